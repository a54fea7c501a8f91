//! 订单消费服务专用错误类型
//!
//! 在共享库 AccountingError 基础上定义逐条消息处理的错误分类。
//! 除 `Shared` 在启动阶段可能致命外，其余变体都只影响当前消息，消费循环照常继续。

use accounting_shared::error::AccountingError;

/// 负载解码错误
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 截断、wire type 错误、长度越界、字符串非 UTF-8 等线上格式问题
    #[error("负载结构非法: {0}")]
    Wire(#[from] prost::DecodeError),

    /// 嵌套消息缺失，无法构造完整的订单事件
    #[error("缺少必填字段: {0}")]
    MissingField(&'static str),
}

/// 订单消息处理错误
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("订单解码失败: {0}")]
    Decode(#[from] DecodeError),

    /// 映射是全函数，该变体只作为兜底，按解码错误处理
    #[error("实体映射失败: {0}")]
    Mapping(String),

    /// 唯一键冲突、连接中断、事务中止统一归为持久化失败，不做重试
    #[error("订单持久化失败: order_id={order_id}, 原因={source}")]
    Persistence {
        order_id: String,
        #[source]
        source: AccountingError,
    },

    #[error("消息接收失败: {0}")]
    Transport(String),

    #[error(transparent)]
    Shared(#[from] AccountingError),
}

impl ConsumerError {
    /// 稳定的错误类别，用于日志字段和指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) | Self::Mapping(_) => "decode",
            Self::Persistence { .. } => "persistence",
            Self::Transport(_) => "transport",
            Self::Shared(_) => "internal",
        }
    }
}
