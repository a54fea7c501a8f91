//! 死信转发
//!
//! 未配置死信 topic 时，处理失败的消息记录日志后丢弃；
//! 配置后，原始负载连同失败原因和来源位点一起转发到死信 topic，供后续排查或重放。
//! 转发失败只记录日志，不影响消费循环。

use std::collections::HashMap;

use accounting_shared::error::Result;
use accounting_shared::kafka::{ConsumerMessage, KafkaProducer};
use accounting_shared::observability::tracing::inject_to_headers;
use async_trait::async_trait;
use tracing::info;

use crate::error::ConsumerError;
use crate::trace_context::TRACEPARENT_HEADER;

/// 死信相关 header 名称
pub mod headers {
    pub const ERROR: &str = "x-dlq-error";
    pub const ERROR_KIND: &str = "x-dlq-error-kind";
    pub const SOURCE_TOPIC: &str = "x-dlq-source-topic";
    pub const SOURCE_PARTITION: &str = "x-dlq-source-partition";
    pub const SOURCE_OFFSET: &str = "x-dlq-source-offset";
}

/// 死信投递接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn forward(&self, msg: &ConsumerMessage, error: &ConsumerError) -> Result<()>;
}

/// 组装转发到死信 topic 的 header
///
/// 保留原始 header，但 trace 上下文替换为当前消费 span，
/// 使死信消息挂在处理失败的那条 trace 下。
pub fn dead_letter_headers(msg: &ConsumerMessage, error: &ConsumerError) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<(String, Vec<u8>)> = msg
        .headers
        .iter()
        .filter(|(name, _)| name.as_str() != TRACEPARENT_HEADER && name.as_str() != "tracestate")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let mut trace_headers = HashMap::new();
    inject_to_headers(&mut trace_headers);
    out.extend(
        trace_headers
            .into_iter()
            .map(|(name, value)| (name, value.into_bytes())),
    );

    out.push((headers::ERROR.to_string(), error.to_string().into_bytes()));
    out.push((headers::ERROR_KIND.to_string(), error.kind().as_bytes().to_vec()));
    out.push((headers::SOURCE_TOPIC.to_string(), msg.topic.clone().into_bytes()));
    out.push((
        headers::SOURCE_PARTITION.to_string(),
        msg.partition.to_string().into_bytes(),
    ));
    out.push((
        headers::SOURCE_OFFSET.to_string(),
        msg.offset.to_string().into_bytes(),
    ));
    out
}

/// 基于 Kafka 生产者的死信投递
pub struct KafkaDeadLetterSink {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn forward(&self, msg: &ConsumerMessage, error: &ConsumerError) -> Result<()> {
        let owned = dead_letter_headers(msg, error);
        let borrowed: Vec<(&str, &[u8])> = owned
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
            .collect();

        let (partition, offset) = self
            .producer
            .send_with_headers(&self.topic, msg.key.as_deref(), &msg.payload, &borrowed)
            .await?;

        info!(
            dlq_topic = %self.topic,
            dlq_partition = partition,
            dlq_offset = offset,
            source_offset = msg.offset,
            "失败消息已转发到死信 topic"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    fn find<'a>(headers: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    #[test]
    fn test_dead_letter_headers() {
        let msg = ConsumerMessage {
            topic: "orders".to_string(),
            partition: 3,
            offset: 128,
            headers: HashMap::from([
                (
                    TRACEPARENT_HEADER.to_string(),
                    b"00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_vec(),
                ),
                ("x-tenant".to_string(), b"acme".to_vec()),
            ]),
            ..Default::default()
        };
        let error = ConsumerError::Decode(DecodeError::MissingField("shipping_cost"));

        let headers = dead_letter_headers(&msg, &error);

        assert_eq!(find(&headers, "x-tenant"), Some(&b"acme"[..]));
        assert_eq!(find(&headers, headers::ERROR_KIND), Some(&b"decode"[..]));
        assert_eq!(find(&headers, headers::SOURCE_TOPIC), Some(&b"orders"[..]));
        assert_eq!(find(&headers, headers::SOURCE_PARTITION), Some(&b"3"[..]));
        assert_eq!(find(&headers, headers::SOURCE_OFFSET), Some(&b"128"[..]));
        // 没有活动 span 时不携带上游的 traceparent
        assert!(find(&headers, TRACEPARENT_HEADER).is_none());
        assert!(
            String::from_utf8_lossy(find(&headers, headers::ERROR).unwrap())
                .contains("shipping_cost")
        );
    }
}
