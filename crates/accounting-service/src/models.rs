//! 订单领域模型与关系型投影
//!
//! `OrderEvent` 是从线上格式解码得到的不可变事件；
//! `OrderRecord` / `LineItemRecord` / `ShippingRecord` 是写入 `accounting` schema
//! 的三张表的行结构，由 `OrderEntities` 作为一个整体交给持久化层。

use std::fmt;

// ---------------------------------------------------------------------------
// 事件模型
// ---------------------------------------------------------------------------

/// 金额
///
/// 整数主单位 + 纳单位小数，全程不经过浮点数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Money {
    pub currency_code: String,
    pub units: i64,
    pub nanos: i32,
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.units < 0 || self.nanos < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:09} {}",
            sign,
            self.units.unsigned_abs(),
            self.nanos.unsigned_abs(),
            self.currency_code
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
}

/// 订单行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub product_id: String,
    /// 解码层不校验业务约束，0 或负数也原样保留
    pub quantity: i32,
    pub cost: Money,
}

/// 一次结账完成后的订单事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    pub order_id: String,
    pub items: Vec<LineItem>,
    pub shipping_tracking_id: String,
    pub shipping_cost: Money,
    pub shipping_address: Address,
}

// ---------------------------------------------------------------------------
// 关系型投影
// ---------------------------------------------------------------------------

/// `accounting."order"` 表的一行
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderRecord {
    pub order_id: String,
}

/// `accounting.orderitem` 表的一行
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LineItemRecord {
    pub item_cost_currency_code: String,
    pub item_cost_units: i64,
    pub item_cost_nanos: i32,
    pub product_id: String,
    pub quantity: i32,
    pub order_id: String,
}

/// `accounting.shipping` 表的一行
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ShippingRecord {
    pub shipping_tracking_id: String,
    pub shipping_cost_currency_code: String,
    pub shipping_cost_units: i64,
    pub shipping_cost_nanos: i32,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
    pub order_id: String,
}

/// 一条订单事件映射出的全部行，作为一个原子单元写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEntities {
    pub order: OrderRecord,
    pub items: Vec<LineItemRecord>,
    pub shipping: ShippingRecord,
}

impl OrderEntities {
    pub fn order_id(&self) -> &str {
        &self.order.order_id
    }

    /// 行总数：订单 + 订单行 + 物流
    pub fn entity_count(&self) -> usize {
        self.items.len() + 2
    }
}

/// 单条消息处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 三张表已在同一事务中提交
    Persisted { order_id: String, entities: usize },
    /// 未配置持久化后端，只完成了解码
    DecodedOnly { order_id: String, items: usize },
}

impl ProcessOutcome {
    pub fn order_id(&self) -> &str {
        match self {
            Self::Persisted { order_id, .. } | Self::DecodedOnly { order_id, .. } => order_id,
        }
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Persisted { .. } => "persisted",
            Self::DecodedOnly { .. } => "decoded_only",
        }
    }
}
