//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::{AccountingError, Result};
use crate::kafka::topics;

/// 数据库配置
///
/// `url` 为空表示仅解码模式：消息照常消费和记录日志，但不写库。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            min_connections: 1,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

/// 位点提交模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// 由客户端自动提交已消费的位点
    #[default]
    Auto,
    /// 消息处理结束后才登记位点，崩溃时未处理完的消息会被重新投递
    AfterProcessing,
}

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// 没有默认值，缺失时服务拒绝启动
    pub brokers: String,
    pub consumer_group: String,
    pub topic: String,
    pub auto_offset_reset: String,
    pub commit_mode: CommitMode,
    /// 处理失败消息的转发目标；为空时记录日志后丢弃
    pub dead_letter_topic: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            consumer_group: "accounting".to_string(),
            topic: topics::ORDERS.to_string(),
            auto_offset_reset: "earliest".to_string(),
            commit_mode: CommitMode::Auto,
            dead_letter_topic: None,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    /// OTLP gRPC 端点，为空时不导出 span
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "accounting".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9464,
            tracing_endpoint: None,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（ACCOUNTING_ 前缀，如 ACCOUNTING_KAFKA__TOPIC -> kafka.topic）
    /// 5. 部署级环境变量 KAFKA_ADDR、DB_CONNECTION_STRING、OTEL_EXPORTER_OTLP_ENDPOINT
    pub fn load(service_name: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let env = std::env::var("ACCOUNTING_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("ACCOUNTING")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("kafka.brokers", std::env::var("KAFKA_ADDR").ok())?
            .set_override_option("database.url", std::env::var("DB_CONNECTION_STRING").ok())?
            .set_override_option(
                "observability.tracing_endpoint",
                std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            )?;

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// 启动前校验
    ///
    /// broker 地址是唯一的必填项；数据库连接串缺失是合法的仅解码部署。
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(AccountingError::Config(
                "缺少 Kafka broker 地址（KAFKA_ADDR 或 kafka.brokers）".to_string(),
            ));
        }
        if self.kafka.topic.trim().is_empty() {
            return Err(AccountingError::Config("kafka.topic 不能为空".to_string()));
        }
        Ok(())
    }

    /// 是否配置了持久化后端
    pub fn persistence_enabled(&self) -> bool {
        self.database
            .url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}
