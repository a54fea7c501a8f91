//! 消费链路 span 封装
//!
//! 每条消息一个顶层 consume span，父节点来自消息 header 中的 trace 上下文；
//! 解码、实体构建、提交三个阶段各自一个子 span。
//! 阶段函数通过 `in_stage` / `in_stage_async` 运行，span 随阶段结束而关闭，与成败无关。

use std::future::Future;

use tracing::{Instrument, Span, field, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::trace_context::TraceParent;

pub const MESSAGING_SYSTEM: &str = "kafka";
pub const OPERATION_RECEIVE: &str = "receive";

/// 创建单条消息的顶层 span
///
/// 必须在首次进入 span 之前设置父上下文，否则 OpenTelemetry 层会生成新的 trace。
pub fn consume_span(
    topic: &str,
    partition: i32,
    offset: i64,
    parent: Option<&TraceParent>,
) -> Span {
    let span = tracing::info_span!(
        "order-consumed",
        otel.name = %format!("{topic} {OPERATION_RECEIVE}"),
        otel.kind = "consumer",
        messaging.system = MESSAGING_SYSTEM,
        messaging.destination.name = %topic,
        messaging.operation = OPERATION_RECEIVE,
        messaging.kafka.partition = partition,
        messaging.kafka.offset = offset,
        order.id = field::Empty,
    );

    if let Some(parent) = parent {
        if let Err(e) = span.set_parent(parent.to_context()) {
            warn!(
                error = ?e,
                trace_id = %parent.trace_id(),
                "无法挂接上游 trace 父上下文，本条消息将开启新的 trace"
            );
        }
    }
    span
}

/// 解码阶段 span，解码成功后记录订单 ID 和订单行数
pub fn decode_span() -> Span {
    tracing::info_span!(
        "parse-order",
        order.id = field::Empty,
        order.item_count = field::Empty,
    )
}

/// 实体构建阶段 span
pub fn build_entities_span(item_count: usize) -> Span {
    tracing::info_span!(
        "build-entities",
        order.item_count = item_count,
        entities.total = field::Empty,
    )
}

/// 事务提交阶段 span
pub fn save_changes_span(entity_count: usize) -> Span {
    tracing::info_span!("save-changes", entities.total = entity_count)
}

/// 在 span 内同步执行一个阶段，返回前 span 已关闭
pub fn in_stage<T>(span: Span, stage: impl FnOnce(&Span) -> T) -> T {
    let entered = span.entered();
    stage(&*entered)
}

/// 在 span 内异步执行一个阶段，future 完成（无论成败）后 span 随之关闭
pub async fn in_stage_async<F: Future>(span: Span, stage: F) -> F::Output {
    stage.instrument(span).await
}

/// 取 span 对应的 OpenTelemetry trace id；未安装 OpenTelemetry 层时返回 None
pub fn span_trace_id(span: &Span) -> Option<String> {
    use opentelemetry::trace::TraceContextExt;

    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_context::{TRACEPARENT_HEADER, extract_trace_parent};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use std::collections::HashMap;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_otel<R>(f: impl FnOnce() -> R) -> R {
        let provider = SdkTracerProvider::builder().build();
        let tracer = provider.tracer("accounting-test");
        let subscriber =
            tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));
        tracing::subscriber::with_default(subscriber, f)
    }

    fn headers_with(value: &str) -> HashMap<String, Vec<u8>> {
        HashMap::from([(TRACEPARENT_HEADER.to_string(), value.as_bytes().to_vec())])
    }

    #[test]
    fn test_consume_span_joins_upstream_trace() {
        with_otel(|| {
            let headers = headers_with("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");
            let parent = extract_trace_parent(&headers);
            assert!(parent.is_some());

            let span = consume_span("orders", 0, 7, parent.as_ref());
            assert_eq!(
                span_trace_id(&span).as_deref(),
                Some("4bf92f3577b34da6a3ce929d0e0e4736")
            );
        });
    }

    #[test]
    fn test_consume_span_without_parent_starts_new_trace() {
        with_otel(|| {
            let span = consume_span("orders", 0, 8, None);
            let trace_id = span_trace_id(&span).expect("应生成新的 trace id");
            assert_ne!(trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        });
    }

    #[test]
    fn test_consume_span_with_malformed_header_starts_new_trace() {
        with_otel(|| {
            let parent = extract_trace_parent(&headers_with("00-not-a-trace-01"));
            assert!(parent.is_none());

            let span = consume_span("orders", 1, 9, parent.as_ref());
            assert!(span_trace_id(&span).is_some());
        });
    }

    #[test]
    fn test_child_stage_shares_trace() {
        with_otel(|| {
            let headers = headers_with("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");
            let parent = extract_trace_parent(&headers);
            let span = consume_span("orders", 0, 10, parent.as_ref());

            let child_trace = span.in_scope(|| in_stage(decode_span(), span_trace_id));
            assert_eq!(
                child_trace.as_deref(),
                Some("4bf92f3577b34da6a3ce929d0e0e4736")
            );
        });
    }

    #[test]
    fn test_in_stage_returns_error_after_span_closed() {
        let result: Result<(), &str> = in_stage(decode_span(), |_| Err("boom"));
        assert_eq!(result, Err("boom"));
    }

    #[tokio::test]
    async fn test_in_stage_async_passes_output() {
        let value = in_stage_async(save_changes_span(4), async { 4usize }).await;
        assert_eq!(value, 4);
    }
}
