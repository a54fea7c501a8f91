//! 订单消息处理器
//!
//! 对单条消息执行完整管道：恢复 trace 父上下文 -> 解码 -> 构建实体 -> 事务提交。
//! 每个阶段在独立子 span 中运行；失败在顶层 span 内记录日志、计入指标并按配置转发死信，
//! 结果返回给消费循环，但不会让循环退出。

use std::sync::Arc;
use std::time::Instant;

use accounting_shared::kafka::ConsumerMessage;
use accounting_shared::observability::metrics;
use accounting_shared::observability::tracing::current_trace_id;
use tracing::{Instrument, debug, error, info, warn};

use crate::dead_letter::DeadLetterSink;
use crate::decoder::decode_order;
use crate::error::ConsumerError;
use crate::mapper::map_order;
use crate::models::{OrderEvent, ProcessOutcome};
use crate::persistence::OrderStore;
use crate::telemetry;
use crate::trace_context::extract_trace_parent;

/// 订单消息处理器
///
/// 使用 trait object 而非泛型参数，处理器会被存储到消费者中，
/// trait object 避免了泛型传播到整个调用链。
pub struct OrderProcessor {
    /// 为空表示仅解码模式
    store: Option<Arc<dyn OrderStore>>,
    /// 为空表示失败消息记录后丢弃
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
}

impl OrderProcessor {
    pub fn new(
        store: Option<Arc<dyn OrderStore>>,
        dead_letter: Option<Arc<dyn DeadLetterSink>>,
    ) -> Self {
        Self { store, dead_letter }
    }

    /// 不写库、不转发死信的处理器
    pub fn decode_only() -> Self {
        Self::new(None, None)
    }

    pub fn persistence_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// 处理一条消息
    ///
    /// 失败已在内部完成日志、指标和死信处理，调用方只需据此统计。
    pub async fn handle(&self, msg: &ConsumerMessage) -> Result<ProcessOutcome, ConsumerError> {
        let parent = extract_trace_parent(&msg.headers);
        let span = telemetry::consume_span(&msg.topic, msg.partition, msg.offset, parent.as_ref());

        async {
            let start = Instant::now();
            let result = self.process(msg).await;
            let elapsed = start.elapsed().as_secs_f64();

            match &result {
                Ok(outcome) => {
                    tracing::Span::current().record("order.id", outcome.order_id());
                    metrics::record_order_consumed(outcome.label(), elapsed);
                    if let ProcessOutcome::Persisted { entities, .. } = outcome {
                        metrics::record_entities_persisted(*entities);
                    }
                    debug!(order_id = %outcome.order_id(), outcome = outcome.label(), "订单消息处理完成");
                }
                Err(e) => {
                    error!(
                        error = %e,
                        kind = e.kind(),
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        key = ?msg.key,
                        trace_id = current_trace_id().as_deref().unwrap_or("-"),
                        "订单消息处理失败"
                    );
                    metrics::record_order_consumed("failed", elapsed);
                    metrics::record_processing_failure(e.kind());
                    self.forward_to_dead_letter(msg, e).await;
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    /// 管道主体，每个阶段的 span 在阶段返回时关闭
    async fn process(&self, msg: &ConsumerMessage) -> Result<ProcessOutcome, ConsumerError> {
        let order = telemetry::in_stage(telemetry::decode_span(), |span| {
            let order = decode_order(&msg.payload)?;
            span.record("order.id", order.order_id.as_str());
            span.record("order.item_count", order.items.len());
            Ok::<_, ConsumerError>(order)
        })?;

        log_order_received(&order);

        let Some(store) = &self.store else {
            debug!(order_id = %order.order_id, "未配置持久化后端，跳过写库");
            return Ok(ProcessOutcome::DecodedOnly {
                order_id: order.order_id,
                items: order.items.len(),
            });
        };

        let entities = telemetry::in_stage(
            telemetry::build_entities_span(order.items.len()),
            |span| {
                let entities = map_order(&order);
                span.record("entities.total", entities.entity_count());
                entities
            },
        );

        let rows = telemetry::in_stage_async(
            telemetry::save_changes_span(entities.entity_count()),
            store.persist(&entities),
        )
        .await
        .map_err(|source| ConsumerError::Persistence {
            order_id: order.order_id.clone(),
            source,
        })?;

        Ok(ProcessOutcome::Persisted {
            order_id: order.order_id,
            entities: rows,
        })
    }

    async fn forward_to_dead_letter(&self, msg: &ConsumerMessage, error: &ConsumerError) {
        let Some(sink) = &self.dead_letter else {
            return;
        };

        match sink.forward(msg, error).await {
            Ok(()) => metrics::record_dead_letter("sent"),
            Err(e) => {
                metrics::record_dead_letter("failed");
                warn!(
                    error = %e,
                    error_code = e.code(),
                    retryable = e.is_retryable(),
                    offset = msg.offset,
                    "转发死信失败，消息将被丢弃"
                );
            }
        }
    }
}

/// 解码成功后的订单摘要日志
fn log_order_received(order: &OrderEvent) {
    info!(
        order_id = %order.order_id,
        item_count = order.items.len(),
        shipping_tracking_id = %order.shipping_tracking_id,
        shipping_cost = %order.shipping_cost,
        "收到订单"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::MockDeadLetterSink;
    use crate::decoder::tests::sample_order;
    use crate::persistence::MockOrderStore;
    use accounting_shared::error::AccountingError;
    use prost::Message;

    fn make_message(offset: i64, payload: Vec<u8>) -> ConsumerMessage {
        ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset,
            payload,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_persists_mapped_entities() {
        let mut store = MockOrderStore::new();
        store
            .expect_persist()
            .withf(|entities| {
                entities.order_id() == "order-1"
                    && entities.items.len() == 2
                    && entities.items.iter().all(|i| i.order_id == "order-1")
                    && entities.shipping.order_id == "order-1"
            })
            .times(1)
            .returning(|entities| Ok(entities.entity_count()));

        let processor = OrderProcessor::new(Some(Arc::new(store)), None);
        let msg = make_message(1, sample_order("order-1", &[2, 1]).encode_to_vec());

        let outcome = processor.handle(&msg).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Persisted {
                order_id: "order-1".to_string(),
                entities: 4,
            }
        );
    }

    #[tokio::test]
    async fn test_decode_only_mode_skips_store() {
        let processor = OrderProcessor::decode_only();
        assert!(!processor.persistence_enabled());

        let msg = make_message(2, sample_order("order-2", &[1]).encode_to_vec());
        let outcome = processor.handle(&msg).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::DecodedOnly {
                order_id: "order-2".to_string(),
                items: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_decode_failure_never_reaches_store() {
        let mut store = MockOrderStore::new();
        store.expect_persist().times(0);

        let processor = OrderProcessor::new(Some(Arc::new(store)), None);
        let msg = make_message(3, b"\x0a\xff".to_vec());

        let err = processor.handle(&msg).await.unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported() {
        let mut store = MockOrderStore::new();
        store
            .expect_persist()
            .times(1)
            .returning(|_| Err(AccountingError::Database(sqlx::Error::PoolTimedOut)));

        let processor = OrderProcessor::new(Some(Arc::new(store)), None);
        let msg = make_message(4, sample_order("order-4", &[1]).encode_to_vec());

        let err = processor.handle(&msg).await.unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().contains("order-4"));
    }

    #[tokio::test]
    async fn test_failures_forwarded_to_dead_letter() {
        let mut sink = MockDeadLetterSink::new();
        sink.expect_forward()
            .withf(|msg, error| msg.offset == 5 && error.kind() == "decode")
            .times(1)
            .returning(|_, _| Ok(()));

        let processor = OrderProcessor::new(None, Some(Arc::new(sink)));
        let msg = make_message(5, vec![0x0F]);

        assert!(processor.handle(&msg).await.is_err());
    }

    #[tokio::test]
    async fn test_dead_letter_failure_is_swallowed() {
        let mut sink = MockDeadLetterSink::new();
        sink.expect_forward()
            .times(1)
            .returning(|_, _| Err(AccountingError::Kafka("broker 不可达".to_string())));

        let processor = OrderProcessor::new(None, Some(Arc::new(sink)));
        let msg = make_message(6, vec![0x0F]);

        // 仍然返回原始的解码错误
        let err = processor.handle(&msg).await.unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[tokio::test]
    async fn test_success_does_not_touch_dead_letter() {
        let mut sink = MockDeadLetterSink::new();
        sink.expect_forward().times(0);

        let processor = OrderProcessor::new(None, Some(Arc::new(sink)));
        let msg = make_message(7, sample_order("order-7", &[]).encode_to_vec());

        assert!(processor.handle(&msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_handle_joins_upstream_trace() {
        use opentelemetry::trace::TracerProvider as _;
        use opentelemetry_sdk::trace::SdkTracerProvider;
        use parking_lot::Mutex;
        use tracing_subscriber::layer::SubscriberExt;

        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry().with(
            tracing_opentelemetry::layer().with_tracer(provider.tracer("accounting-test")),
        );
        let _default = tracing::subscriber::set_default(subscriber);

        let seen = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let mut store = MockOrderStore::new();
        store.expect_persist().times(1).returning(move |entities| {
            *captured.lock() = current_trace_id();
            Ok(entities.entity_count())
        });

        let processor = OrderProcessor::new(Some(Arc::new(store)), None);
        let mut msg = make_message(8, sample_order("order-8", &[1]).encode_to_vec());
        msg.headers.insert(
            "traceparent".to_string(),
            b"00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_vec(),
        );

        processor.handle(&msg).await.unwrap();

        assert_eq!(
            seen.lock().as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }
}
