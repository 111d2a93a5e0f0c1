use std::sync::{Arc, RwLock};

use messaging_errors::{MessagingError, MessagingResult};
use tracing::{info, warn};

use crate::entities::MessageEnvelope;

/// 消息事件钩子，由外部观察者实现
///
/// 钩子在发送与接收路径上同步调用；钩子自身的失败只记录日志，
/// 绝不向分发循环传播。
pub trait EventHook: Send + Sync {
    /// 每次成功入队发送调用一次
    fn message_sent(&self, envelope: &MessageEnvelope) -> MessagingResult<()>;

    /// 每个成功执行的处理器调用一次
    fn message_received(&self, envelope: &MessageEnvelope) -> MessagingResult<()>;

    /// 处理器执行失败时调用
    fn handler_failed(
        &self,
        envelope: &MessageEnvelope,
        handler: &str,
        error: &MessagingError,
    ) -> MessagingResult<()>;
}

/// 进程级事件钩子注册表
///
/// 注册与清空受锁保护；分发时按注册顺序读取快照，
/// 读取方容忍两次调用之间列表发生变化。
#[derive(Default)]
pub struct EventHookRegistry {
    hooks: RwLock<Vec<Arc<dyn EventHook>>>,
}

impl EventHookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_hook(&self, hook: Arc<dyn EventHook>) {
        self.hooks.write().unwrap().push(hook);
    }

    pub fn clear(&self) {
        self.hooks.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventHook>> {
        self.hooks.read().unwrap().clone()
    }

    pub fn notify_sent(&self, envelope: &MessageEnvelope) {
        for hook in self.snapshot() {
            if let Err(e) = hook.message_sent(envelope) {
                warn!("事件钩子message_sent执行失败: {}", e);
            }
        }
    }

    pub fn notify_received(&self, envelope: &MessageEnvelope) {
        for hook in self.snapshot() {
            if let Err(e) = hook.message_received(envelope) {
                warn!("事件钩子message_received执行失败: {}", e);
            }
        }
    }

    pub fn notify_handler_failed(
        &self,
        envelope: &MessageEnvelope,
        handler: &str,
        error: &MessagingError,
    ) {
        for hook in self.snapshot() {
            if let Err(e) = hook.handler_failed(envelope, handler, error) {
                warn!("事件钩子handler_failed执行失败: {}", e);
            }
        }
    }
}

/// 把消息事件打印到日志的钩子
pub struct LoggingEventHook;

impl EventHook for LoggingEventHook {
    fn message_sent(&self, envelope: &MessageEnvelope) -> MessagingResult<()> {
        info!(
            "Sent: {} (correlation_id={})",
            envelope.kind(),
            envelope.correlation_id
        );
        Ok(())
    }

    fn message_received(&self, envelope: &MessageEnvelope) -> MessagingResult<()> {
        info!(
            "Got: {} (correlation_id={})",
            envelope.kind(),
            envelope.correlation_id
        );
        Ok(())
    }

    fn handler_failed(
        &self,
        envelope: &MessageEnvelope,
        handler: &str,
        error: &MessagingError,
    ) -> MessagingResult<()> {
        warn!(
            "Handler {} failed for {} (correlation_id={}): {}",
            handler,
            envelope.kind(),
            envelope.correlation_id,
            error
        );
        Ok(())
    }
}
