//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // 保存到全局，供其他地方获取指标快照
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "orders_consumed_total",
        "Total number of order messages processed, by outcome"
    );
    metrics::describe_histogram!(
        "order_processing_duration_seconds",
        "Per-message processing duration in seconds"
    );
    metrics::describe_counter!(
        "order_processing_failures_total",
        "Total number of per-message failures, by kind"
    );
    metrics::describe_counter!(
        "order_entities_persisted_total",
        "Total number of rows written (orders, line items, shipping)"
    );
    metrics::describe_counter!(
        "kafka_transport_errors_total",
        "Total number of broker receive errors"
    );
    metrics::describe_counter!(
        "dead_letter_messages_total",
        "Total number of messages forwarded to the dead-letter topic"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一条消息的处理结果与耗时
#[inline]
pub fn record_order_consumed(outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "orders_consumed_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "order_processing_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录单条消息处理失败
#[inline]
pub fn record_processing_failure(kind: &str) {
    metrics::counter!(
        "order_processing_failures_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录写入的实体行数
#[inline]
pub fn record_entities_persisted(count: usize) {
    metrics::counter!("order_entities_persisted_total").increment(count as u64);
}

/// 记录 broker 接收错误
#[inline]
pub fn record_transport_error() {
    metrics::counter!("kafka_transport_errors_total").increment(1);
}

/// 记录死信转发
#[inline]
pub fn record_dead_letter(status: &str) {
    metrics::counter!(
        "dead_letter_messages_total",
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_order_consumed("persisted", 0.01);
        record_order_consumed("failed", 0.002);
        record_processing_failure("decode");
        record_entities_persisted(4);
        record_transport_error();
        record_dead_letter("sent");
    }

    #[test]
    fn test_handle_absent_before_init() {
        assert!(get_handle().is_none());
    }
}
