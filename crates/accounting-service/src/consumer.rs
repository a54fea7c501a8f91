//! 订单消费循环
//!
//! 生命周期：Idle -> Listening <-> Processing -> Draining -> Stopped。
//! 单个订阅上的消息严格串行处理，任何一条消息失败都不会终止循环；
//! 只有停止请求或订阅不可恢复地结束才会让循环退出。

use std::fmt;
use std::sync::Arc;

use accounting_shared::kafka::{ConsumerMessage, MessageSource};
use accounting_shared::observability::metrics;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ConsumerError;
use crate::models::ProcessOutcome;
use crate::processor::OrderProcessor;

/// 消费者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// 已创建，尚未订阅
    Idle,
    /// 等待下一条消息
    Listening,
    /// 正在处理一条消息
    Processing,
    /// 已收到停止请求，正在释放订阅
    Draining,
    /// 终态
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Processing => write!(f, "processing"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// 消费者与其句柄共享的生命周期状态
struct Lifecycle {
    state: Mutex<ConsumerState>,
    shutdown: watch::Sender<bool>,
}

impl Lifecycle {
    fn set_state(&self, next: ConsumerState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = %*state, to = %next, "消费者状态切换");
            *state = next;
        }
    }

    /// 从 `from` 进入 Listening
    ///
    /// 与 `ConsumerHandle::stop` 在同一把锁下判断：已请求停止或状态已被改写时不切换，返回 false。
    fn enter_listening(&self, from: ConsumerState) -> bool {
        let mut state = self.state.lock();
        if *state != from || *self.shutdown.borrow() {
            return false;
        }
        debug!(from = %*state, to = %ConsumerState::Listening, "消费者状态切换");
        *state = ConsumerState::Listening;
        true
    }
}

/// 消费者控制句柄
///
/// 可以在其他任务中持有，用于发起停止和观察状态。
#[derive(Clone)]
pub struct ConsumerHandle {
    lifecycle: Arc<Lifecycle>,
}

impl ConsumerHandle {
    /// 请求停止
    ///
    /// 幂等；正在处理的消息会先完成，之后不再接收新消息。
    /// 尚未启动的消费者直接进入 Stopped。
    pub fn stop(&self) {
        if self.lifecycle.shutdown.send_replace(true) {
            debug!("消费者已在停止中，忽略重复的停止请求");
            return;
        }

        let mut state = self.lifecycle.state.lock();
        if *state == ConsumerState::Idle {
            *state = ConsumerState::Stopped;
        }
        info!(state = %*state, "收到停止请求");
    }

    pub fn state(&self) -> ConsumerState {
        *self.lifecycle.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ConsumerState::Stopped
    }
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub processed: u64,
    pub persisted: u64,
    pub decoded_only: u64,
    pub failed: u64,
    pub transport_errors: u64,
}

/// select 的结果，在所有 future 释放后再处理
enum LoopEvent {
    Shutdown,
    Message(ConsumerMessage),
    TransportError(String),
    Closed,
}

/// 订单消费者
///
/// 泛型参数是消息来源：生产环境为 Kafka 消费者，测试中可替换为内存实现。
pub struct OrderConsumer<S: MessageSource> {
    source: S,
    processor: OrderProcessor,
    topic: String,
    lifecycle: Arc<Lifecycle>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: MessageSource> OrderConsumer<S> {
    pub fn new(source: S, processor: OrderProcessor, topic: impl Into<String>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            source,
            processor,
            topic: topic.into(),
            lifecycle: Arc::new(Lifecycle {
                state: Mutex::new(ConsumerState::Idle),
                shutdown,
            }),
            shutdown_rx,
        }
    }

    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// 订阅并运行消费循环，直到收到停止请求或订阅结束
    ///
    /// 只有订阅失败会返回错误；单条消息的失败已在处理器内部消化。
    pub async fn run(mut self) -> Result<ConsumeSummary, ConsumerError> {
        let mut summary = ConsumeSummary::default();

        if *self.shutdown_rx.borrow() {
            self.lifecycle.set_state(ConsumerState::Stopped);
            info!("启动前已收到停止请求，消费者不再订阅");
            return Ok(summary);
        }

        if let Err(e) = self.source.subscribe(&[self.topic.as_str()]) {
            self.lifecycle.set_state(ConsumerState::Stopped);
            return Err(ConsumerError::Transport(e.to_string()));
        }

        if !self.lifecycle.enter_listening(ConsumerState::Idle) {
            // 订阅期间收到停止请求
            self.source.close();
            self.lifecycle.set_state(ConsumerState::Stopped);
            info!("订阅完成前已收到停止请求，消费者不再监听");
            return Ok(summary);
        }
        info!(
            topic = %self.topic,
            persistence = self.processor.persistence_enabled(),
            "订单消费循环已启动"
        );

        loop {
            let event = tokio::select! {
                // 偏向停止信号，保证停止后不再取新消息
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        LoopEvent::Shutdown
                    } else {
                        continue;
                    }
                }

                next = self.source.recv() => match next {
                    Some(Ok(msg)) => LoopEvent::Message(msg),
                    Some(Err(e)) => LoopEvent::TransportError(e.to_string()),
                    None => LoopEvent::Closed,
                },
            };

            match event {
                LoopEvent::Shutdown => {
                    info!("收到停止信号，订单消费循环退出");
                    break;
                }
                LoopEvent::Message(msg) => self.dispatch(msg, &mut summary).await,
                LoopEvent::TransportError(reason) => {
                    summary.transport_errors += 1;
                    metrics::record_transport_error();
                    error!(error = %reason, topic = %self.topic, "Kafka 消费出错，继续等待下一条消息");
                }
                LoopEvent::Closed => {
                    warn!(topic = %self.topic, "订阅意外结束，订单消费循环退出");
                    break;
                }
            }
        }

        self.lifecycle.set_state(ConsumerState::Draining);
        self.source.close();
        self.lifecycle.set_state(ConsumerState::Stopped);

        info!(
            processed = summary.processed,
            persisted = summary.persisted,
            decoded_only = summary.decoded_only,
            failed = summary.failed,
            transport_errors = summary.transport_errors,
            "订单消费者已停止"
        );
        Ok(summary)
    }

    async fn dispatch(&mut self, msg: ConsumerMessage, summary: &mut ConsumeSummary) {
        self.lifecycle.set_state(ConsumerState::Processing);
        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "收到订单消息"
        );

        summary.processed += 1;
        match self.processor.handle(&msg).await {
            Ok(ProcessOutcome::Persisted { .. }) => summary.persisted += 1,
            Ok(ProcessOutcome::DecodedOnly { .. }) => summary.decoded_only += 1,
            Err(_) => summary.failed += 1,
        }

        // 失败的消息同样登记位点，不会被重新投递
        if let Err(e) = self.source.ack(&msg) {
            warn!(error = %e, offset = msg.offset, "登记消费位点失败");
        }

        // 处理期间收到停止请求时保持 Processing，由循环直接进入 Draining
        self.lifecycle.enter_listening(ConsumerState::Processing);
    }
}
