//! 订单持久化
//!
//! 每条消息借出一个连接开启独立事务，订单、订单行、物流三张表要么全部提交，要么全部回滚。
//! 不做内部重试，任何失败都以单一错误返回给调用方。

use accounting_shared::error::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::models::{LineItemRecord, OrderEntities, OrderRecord, ShippingRecord};

/// 订单存储接口
///
/// 处理器只依赖该抽象；是否配置后端由处理器持有 `Option` 决定，
/// 因此这里不需要空实现。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 原子地写入一条订单的全部实体，返回写入的行数
    async fn persist(&self, entities: &OrderEntities) -> Result<usize>;
}

/// PostgreSQL 订单存储
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounting."order" (order_id)
            VALUES ($1)
            "#,
        )
        .bind(&order.order_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_item(tx: &mut Transaction<'_, Postgres>, item: &LineItemRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounting.orderitem
                (item_cost_currency_code, item_cost_units, item_cost_nanos,
                 product_id, quantity, order_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&item.item_cost_currency_code)
        .bind(item.item_cost_units)
        .bind(item.item_cost_nanos)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(&item.order_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_shipping(
        tx: &mut Transaction<'_, Postgres>,
        shipping: &ShippingRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounting.shipping
                (shipping_tracking_id, shipping_cost_currency_code, shipping_cost_units,
                 shipping_cost_nanos, street_address, city, state, country, zip_code, order_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&shipping.shipping_tracking_id)
        .bind(&shipping.shipping_cost_currency_code)
        .bind(shipping.shipping_cost_units)
        .bind(shipping.shipping_cost_nanos)
        .bind(&shipping.street_address)
        .bind(&shipping.city)
        .bind(&shipping.state)
        .bind(&shipping.country)
        .bind(&shipping.zip_code)
        .bind(&shipping.order_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn persist(&self, entities: &OrderEntities) -> Result<usize> {
        // 任一步骤通过 ? 提前返回时 tx 被 drop，sqlx 自动回滚并归还连接
        let mut tx = self.pool.begin().await?;

        Self::insert_order(&mut tx, &entities.order).await?;
        for item in &entities.items {
            Self::insert_item(&mut tx, item).await?;
        }
        Self::insert_shipping(&mut tx, &entities.shipping).await?;

        tx.commit().await?;

        debug!(
            order_id = %entities.order_id(),
            rows = entities.entity_count(),
            "订单实体已提交"
        );
        Ok(entities.entity_count())
    }
}
