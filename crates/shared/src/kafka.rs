//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息所有权转换、错误映射和位点登记语义，避免服务层直接依赖 rdkafka 类型。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::config::{CommitMode, KafkaConfig};
use crate::error::{AccountingError, Result};

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理 topic 名称，防止字符串散落在各处导致拼写不一致
pub mod topics {
    pub const ORDERS: &str = "orders";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
/// header 值保持原始字节，由使用方决定如何解码。
#[derive(Debug, Clone, Default)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, Vec<u8>>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for header in h.iter() {
                if let Some(raw) = header.value {
                    headers.insert(header.key.to_string(), raw.to_vec());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageSource
// ---------------------------------------------------------------------------

/// 消息来源抽象
///
/// 消费循环只依赖这个 trait，生产环境由 [`KafkaConsumer`] 实现，
/// 测试中可以用内存通道替代，从而在没有 broker 的情况下验证循环语义。
#[async_trait]
pub trait MessageSource: Send {
    /// 订阅 topic 列表
    fn subscribe(&mut self, topics: &[&str]) -> Result<()>;

    /// 等待下一条消息
    ///
    /// `Some(Err(_))` 表示传输层错误，调用方应记录后继续；
    /// `None` 表示订阅已不可恢复地结束。
    /// 实现必须可以被安全取消（future 在完成前被 drop 不丢消息）。
    async fn recv(&mut self) -> Option<Result<ConsumerMessage>>;

    /// 消息处理结束后登记位点，默认无操作
    fn ack(&mut self, _msg: &ConsumerMessage) -> Result<()> {
        Ok(())
    }

    /// 释放订阅
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 设为 5 秒：死信转发失败只记录日志，不阻塞消费循环。
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| AccountingError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息，附带 header
    pub async fn send_with_headers(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(&str, &[u8])],
    ) -> Result<(i32, i64)> {
        let mut owned = OwnedHeaders::new_with_capacity(headers.len());
        for &(name, value) in headers {
            owned = owned.insert(Header {
                key: name,
                value: Some(value),
            });
        }

        let mut record = FutureRecord::<str, [u8]>::to(topic)
            .payload(payload)
            .headers(owned);
        if let Some(key) = key {
            record = record.key(key);
        }

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| AccountingError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer`，按配置决定位点由客户端自动登记还是处理完成后手动登记；
/// 两种模式下位点提交都由客户端的 auto-commit 完成。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    commit_mode: CommitMode,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let manual_store = config.commit_mode == CommitMode::AfterProcessing;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set(
                "enable.auto.offset.store",
                if manual_store { "false" } else { "true" },
            )
            .create()
            .map_err(|e| AccountingError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            commit_mode = ?config.commit_mode,
            "Kafka 消费者已初始化"
        );
        Ok(Self {
            consumer,
            commit_mode: config.commit_mode,
        })
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    fn subscribe(&mut self, topics: &[&str]) -> Result<()> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| AccountingError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ConsumerMessage>> {
        let result = match self.consumer.recv().await {
            Ok(borrowed) => Ok(ConsumerMessage::from_borrowed(&borrowed)),
            Err(e) => Err(AccountingError::Kafka(format!("接收消息出错: {e}"))),
        };
        Some(result)
    }

    fn ack(&mut self, msg: &ConsumerMessage) -> Result<()> {
        if self.commit_mode != CommitMode::AfterProcessing {
            return Ok(());
        }

        // 登记的是下一条待消费的位点
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
            .map_err(|e| AccountingError::Kafka(format!("构造位点失败: {e}")))?;
        self.consumer
            .store_offsets(&tpl)
            .map_err(|e| AccountingError::Kafka(format!("登记位点失败: {e}")))
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
        info!("已取消 Kafka 订阅");
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
