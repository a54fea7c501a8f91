//! PgOrderStore 集成测试
//!
//! 使用真实 PostgreSQL 验证单条订单的事务语义：三张表要么全部写入，要么全部不写入。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... \
//!   cargo test -p accounting-service --test persistence_test -- --ignored
//! ```

use accounting_service::mapper::map_order;
use accounting_service::models::{Address, LineItem, Money, OrderEvent};
use accounting_service::persistence::{OrderStore, PgOrderStore};
use sqlx::PgPool;

// ==================== 辅助函数 ====================

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

async fn setup_pool() -> PgPool {
    let pool = PgPool::connect(&database_url())
        .await
        .expect("连接测试数据库失败");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("执行数据库迁移失败");
    pool
}

fn usd(units: i64, nanos: i32) -> Money {
    Money {
        currency_code: "USD".to_string(),
        units,
        nanos,
    }
}

fn make_event(order_id: &str, product_ids: &[&str]) -> OrderEvent {
    OrderEvent {
        order_id: order_id.to_string(),
        items: product_ids
            .iter()
            .map(|product_id| LineItem {
                product_id: product_id.to_string(),
                quantity: 1,
                cost: usd(19, 990_000_000),
            })
            .collect(),
        shipping_tracking_id: format!("track-{order_id}"),
        shipping_cost: usd(5, 990_000_000),
        shipping_address: Address {
            street_address: "1600 Amphitheatre Parkway".to_string(),
            city: "Mountain View".to_string(),
            state: "CA".to_string(),
            country: "United States".to_string(),
            zip_code: "94043".to_string(),
        },
    }
}

async fn count_rows(pool: &PgPool, order_id: &str) -> (i64, i64, i64) {
    let orders: i64 =
        sqlx::query_scalar(r#"SELECT COUNT(*) FROM accounting."order" WHERE order_id = $1"#)
            .bind(order_id)
            .fetch_one(pool)
            .await
            .expect("查询订单失败");
    let items: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM accounting.orderitem WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(pool)
            .await
            .expect("查询订单行失败");
    let shipping: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM accounting.shipping WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(pool)
            .await
            .expect("查询物流失败");
    (orders, items, shipping)
}

fn unique_order_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

// ==================== 测试用例 ====================

#[tokio::test]
#[ignore = "需要 PostgreSQL，设置 DATABASE_URL 后使用 --ignored 运行"]
async fn test_persist_writes_all_entities() {
    let pool = setup_pool().await;
    let store = PgOrderStore::new(pool.clone());

    let order_id = unique_order_id("persist-ok");
    let entities = map_order(&make_event(&order_id, &["sku-a", "sku-b"]));

    let rows = store.persist(&entities).await.expect("写入订单失败");
    assert_eq!(rows, 4);
    assert_eq!(count_rows(&pool, &order_id).await, (1, 2, 1));

    let (units, nanos): (i64, i32) = sqlx::query_as(
        "SELECT shipping_cost_units, shipping_cost_nanos FROM accounting.shipping WHERE order_id = $1",
    )
    .bind(&order_id)
    .fetch_one(&pool)
    .await
    .expect("查询物流金额失败");
    assert_eq!((units, nanos), (5, 990_000_000));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL，设置 DATABASE_URL 后使用 --ignored 运行"]
async fn test_failed_write_leaves_no_rows() {
    let pool = setup_pool().await;
    let store = PgOrderStore::new(pool.clone());

    // 同一订单出现两次相同商品，第二行触发主键冲突，此时订单行已部分写入
    let order_id = unique_order_id("persist-rollback");
    let entities = map_order(&make_event(&order_id, &["sku-dup", "sku-dup"]));

    let result = store.persist(&entities).await;
    assert!(result.is_err());
    assert_eq!(count_rows(&pool, &order_id).await, (0, 0, 0));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL，设置 DATABASE_URL 后使用 --ignored 运行"]
async fn test_redelivered_order_is_rejected_without_partial_rows() {
    let pool = setup_pool().await;
    let store = PgOrderStore::new(pool.clone());

    let order_id = unique_order_id("persist-redeliver");
    let entities = map_order(&make_event(&order_id, &["sku-a"]));

    store.persist(&entities).await.expect("首次写入失败");
    assert!(store.persist(&entities).await.is_err());
    assert_eq!(count_rows(&pool, &order_id).await, (1, 1, 1));
}
