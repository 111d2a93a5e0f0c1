use async_trait::async_trait;
use messaging_errors::MessagingResult;

use crate::entities::Message;

/// 消息处理器
///
/// 绑定到某个消息类型（或类别）上，每收到一条命中消息被调用一次。
/// 处理器抛出的错误由接收端隔离上报，不会影响其他处理器。
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, message: M) -> MessagingResult<()>;
}
