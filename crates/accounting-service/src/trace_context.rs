//! 追踪上下文桥接
//!
//! 从 Kafka 消息 header 中恢复上游生产者的 W3C trace 父上下文，
//! 让消费侧 span 挂在同一条分布式 trace 上。
//! 这里的任何失败都只降级为"无父上下文"，不会影响消息处理。

use std::collections::HashMap;

use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::{debug, warn};

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// 从消息元数据恢复的远端父 span
#[derive(Debug, Clone, PartialEq)]
pub struct TraceParent {
    span_context: SpanContext,
}

impl TraceParent {
    pub fn trace_id(&self) -> TraceId {
        self.span_context.trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.span_context.span_id()
    }

    pub fn flags(&self) -> TraceFlags {
        self.span_context.trace_flags()
    }

    /// 构造可作为 span 父节点的 OpenTelemetry Context
    pub fn to_context(&self) -> Context {
        Context::new().with_remote_span_context(self.span_context.clone())
    }
}

/// 字节 header 提取器，非 UTF-8 的值视为不存在
struct ByteHeaderExtractor<'a>(&'a HashMap<String, Vec<u8>>);

impl Extractor for ByteHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// 从消息 header 提取 trace 父上下文
///
/// 缺失、非 UTF-8、不符合 `version-traceId-spanId-flags` 语法时返回 `None`。
pub fn extract_trace_parent(headers: &HashMap<String, Vec<u8>>) -> Option<TraceParent> {
    let Some(raw) = headers.get(TRACEPARENT_HEADER) else {
        debug!("消息未携带 traceparent，开启新的 trace");
        return None;
    };

    let Ok(text) = std::str::from_utf8(raw) else {
        warn!(len = raw.len(), "traceparent 不是合法的 UTF-8，忽略");
        return None;
    };

    let context = TraceContextPropagator::new().extract(&ByteHeaderExtractor(headers));
    let span_context = context.span().span_context().clone();

    if !span_context.is_valid() {
        warn!(traceparent = %text, "traceparent 格式非法，忽略");
        return None;
    }

    debug!(
        trace_id = %span_context.trace_id(),
        parent_span_id = %span_context.span_id(),
        "已恢复上游追踪上下文"
    );
    Some(TraceParent { span_context })
}
