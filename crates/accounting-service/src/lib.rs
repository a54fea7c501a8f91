//! 订单记账服务
//!
//! 从 Kafka 订阅订单结果事件，恢复上游 trace 上下文后解码 protobuf 负载，
//! 拆分为订单、订单行、物流三类记录并在单个事务内写入 PostgreSQL。
//! 单条消息失败只影响自身，消费循环持续运行直到收到停止请求。

pub mod consumer;
pub mod dead_letter;
pub mod decoder;
pub mod error;
pub mod mapper;
pub mod models;
pub mod persistence;
pub mod processor;
pub mod telemetry;
pub mod trace_context;
