//! 订单事件解码
//!
//! 将 Protobuf 负载解码为 `OrderEvent`。只做结构校验：
//! 线上格式错误和缺失的嵌套消息会被拒绝，业务取值（数量为 0、空商品 ID 等）原样接受。

use accounting_proto::oteldemo;
use prost::Message;

use crate::error::DecodeError;
use crate::models::{Address, LineItem, Money, OrderEvent};

/// 解码一条消息负载
pub fn decode_order(payload: &[u8]) -> Result<OrderEvent, DecodeError> {
    let raw = oteldemo::OrderResult::decode(payload)?;
    OrderEvent::try_from(raw)
}

impl From<oteldemo::Money> for Money {
    fn from(m: oteldemo::Money) -> Self {
        Self {
            currency_code: m.currency_code,
            units: m.units,
            nanos: m.nanos,
        }
    }
}

impl From<oteldemo::Address> for Address {
    fn from(a: oteldemo::Address) -> Self {
        Self {
            street_address: a.street_address,
            city: a.city,
            state: a.state,
            country: a.country,
            zip_code: a.zip_code,
        }
    }
}

impl TryFrom<oteldemo::OrderItem> for LineItem {
    type Error = DecodeError;

    fn try_from(item: oteldemo::OrderItem) -> Result<Self, Self::Error> {
        let cart_item = item.item.ok_or(DecodeError::MissingField("items.item"))?;
        let cost = item.cost.ok_or(DecodeError::MissingField("items.cost"))?;

        Ok(Self {
            product_id: cart_item.product_id,
            quantity: cart_item.quantity,
            cost: cost.into(),
        })
    }
}

impl TryFrom<oteldemo::OrderResult> for OrderEvent {
    type Error = DecodeError;

    fn try_from(raw: oteldemo::OrderResult) -> Result<Self, Self::Error> {
        let shipping_cost = raw
            .shipping_cost
            .ok_or(DecodeError::MissingField("shipping_cost"))?;
        let shipping_address = raw
            .shipping_address
            .ok_or(DecodeError::MissingField("shipping_address"))?;

        let items = raw
            .items
            .into_iter()
            .map(LineItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            order_id: raw.order_id,
            items,
            shipping_tracking_id: raw.shipping_tracking_id,
            shipping_cost: shipping_cost.into(),
            shipping_address: shipping_address.into(),
        })
    }
}
