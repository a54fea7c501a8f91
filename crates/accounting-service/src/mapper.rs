//! 订单事件到关系型实体的映射
//!
//! 全函数：任何解码成功的 `OrderEvent` 都能映射，金额字段原样拷贝，不做换算和舍入。

use crate::models::{LineItemRecord, OrderEntities, OrderEvent, OrderRecord, ShippingRecord};

/// 将订单事件拆分为订单、订单行、物流三类记录
///
/// 订单行保持事件中的顺序，每行都以订单 ID 作为外键。
pub fn map_order(event: &OrderEvent) -> OrderEntities {
    let order = OrderRecord {
        order_id: event.order_id.clone(),
    };

    let items = event
        .items
        .iter()
        .map(|item| LineItemRecord {
            item_cost_currency_code: item.cost.currency_code.clone(),
            item_cost_units: item.cost.units,
            item_cost_nanos: item.cost.nanos,
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            order_id: event.order_id.clone(),
        })
        .collect();

    let address = &event.shipping_address;
    let shipping = ShippingRecord {
        shipping_tracking_id: event.shipping_tracking_id.clone(),
        shipping_cost_currency_code: event.shipping_cost.currency_code.clone(),
        shipping_cost_units: event.shipping_cost.units,
        shipping_cost_nanos: event.shipping_cost.nanos,
        street_address: address.street_address.clone(),
        city: address.city.clone(),
        state: address.state.clone(),
        country: address.country.clone(),
        zip_code: address.zip_code.clone(),
        order_id: event.order_id.clone(),
    };

    OrderEntities {
        order,
        items,
        shipping,
    }
}
