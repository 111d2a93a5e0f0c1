use std::sync::Arc;

use async_trait::async_trait;
use messaging_errors::MessagingResult;

/// 工作项的终结动作
///
/// 每个工作项必须恰好调用Finish或Cancel其中之一。
#[async_trait]
pub trait Completion: Send + Sync {
    /// 确认完成，把该项从来源中移除
    async fn finish(&self) -> MessagingResult<()>;

    /// 放弃本次处理，该项按来源策略重投或保留
    async fn cancel(&self) -> MessagingResult<()>;
}

struct NoopCompletion;

#[async_trait]
impl Completion for NoopCompletion {
    async fn finish(&self) -> MessagingResult<()> {
        Ok(())
    }

    async fn cancel(&self) -> MessagingResult<()> {
        Ok(())
    }
}

/// 带终结动作的工作项
pub struct WorkItem<T> {
    pub item: T,
    completion: Arc<dyn Completion>,
}

impl<T> WorkItem<T> {
    pub fn new(item: T, completion: Arc<dyn Completion>) -> Self {
        Self { item, completion }
    }

    /// 无终结动作的工作项，用于不需要确认语义的来源
    pub fn detached(item: T) -> Self {
        Self {
            item,
            completion: Arc::new(NoopCompletion),
        }
    }

    pub async fn finish(&self) -> MessagingResult<()> {
        self.completion.finish().await
    }

    pub async fn cancel(&self) -> MessagingResult<()> {
        self.completion.cancel().await
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("item", &self.item)
            .finish_non_exhaustive()
    }
}

/// 分发器的队列抽象
///
/// 实现可以持有真实的队列，也可以在被拉取时向broker请求。
/// 空队列时的限速由实现负责（内部调用Sleeper），分发器本身不做休眠。
#[async_trait]
pub trait WorkQueue<T: Send>: Send + Sync {
    /// 尝试取出一个工作项。Ok(None)表示当前无可用项；
    /// Err表示本轮拉取遇到致命错误。
    async fn try_dequeue(&self) -> MessagingResult<Option<WorkItem<T>>>;

    /// 近似长度，0可作为"未知"，调用方不得依赖其精确性
    async fn length(&self) -> usize;

    /// 建议性就绪探测，无需等待时直接返回true
    async fn block_until_ready(&self) -> bool {
        true
    }
}
