//! 订单记账服务入口

use std::sync::Arc;

use accounting_service::{
    consumer::OrderConsumer,
    dead_letter::{DeadLetterSink, KafkaDeadLetterSink},
    persistence::{OrderStore, PgOrderStore},
    processor::OrderProcessor,
};
use accounting_shared::{
    config::AppConfig,
    database::Database,
    kafka::{KafkaConsumer, KafkaProducer},
    observability,
};
use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "accounting";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置；配置文件缺失时使用默认值，由后续校验决定能否启动
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        topic = %config.kafka.topic,
        group_id = %config.kafka.consumer_group,
        "Starting accounting service..."
    );

    // 3. 缺少 broker 地址是致命配置错误
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration, exiting");
        return Err(e.into());
    }

    // 4. 可选的持久化后端
    let database = if config.persistence_enabled() {
        let db = Database::connect(&config.database).await?;
        db.health_check().await?;
        info!("Database connection established");
        Some(db)
    } else {
        warn!("DB_CONNECTION_STRING not set, orders will be decoded and logged only");
        None
    };

    let store: Option<Arc<dyn OrderStore>> = database
        .as_ref()
        .map(|db| Arc::new(PgOrderStore::new(db.pool().clone())) as Arc<dyn OrderStore>);

    // 5. 可选的死信转发
    let dead_letter: Option<Arc<dyn DeadLetterSink>> = match &config.kafka.dead_letter_topic {
        Some(topic) => {
            let producer = KafkaProducer::new(&config.kafka)?;
            info!(dlq_topic = %topic, "Dead letter forwarding enabled");
            Some(Arc::new(KafkaDeadLetterSink::new(producer, topic.clone())))
        }
        None => None,
    };

    // 6. 创建消费者并注册停止信号
    let source = KafkaConsumer::new(&config.kafka)?;
    let processor = OrderProcessor::new(store, dead_letter);
    let consumer = OrderConsumer::new(source, processor, config.kafka.topic.clone());

    let handle = consumer.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.stop();
    });

    // 7. 运行直到停止
    let summary = consumer.run().await?;
    info!(?summary, "Consumer loop finished");

    if let Some(db) = database {
        db.close().await;
    }

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM；信号注册失败时只记录日志，永不触发停止
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
