use std::sync::Arc;
use std::time::Duration;

use messaging_dispatcher::{DispatchFailure, Sleeper, WorkDispatcher};
use messaging_domain::{BrokerTransport, EventHookRegistry, Message, MessageEnvelope, WorkQueue};
use messaging_errors::MessagingResult;
use messaging_infrastructure::{PersistentWorkQueue, SqliteOutbox};
use tracing::{debug, warn};

/// 存储转发的发送节点
///
/// `send`只把序列化后的消息写入持久存储就返回，从不等待broker。
/// 后台分发器以单并发从存储拉取并发布，保证同一发送节点内的
/// 发布顺序；发送失败的记录留在存储中按序重试，退避逐步加长。
pub struct SenderNode {
    queue: Arc<PersistentWorkQueue>,
    outbox: Arc<SqliteOutbox>,
    dispatcher: Arc<WorkDispatcher<Vec<u8>>>,
    hooks: Arc<EventHookRegistry>,
}

impl SenderNode {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        outbox: Arc<SqliteOutbox>,
        hooks: Arc<EventHookRegistry>,
    ) -> Arc<Self> {
        let sleeper = Arc::new(Sleeper::new());
        let queue = Arc::new(PersistentWorkQueue::new(
            Arc::clone(&outbox),
            Arc::clone(&sleeper),
        ));
        let dispatcher = Arc::new(WorkDispatcher::new(
            Arc::clone(&queue) as Arc<dyn WorkQueue<Vec<u8>>>
        ));
        // 单并发保证发布顺序
        dispatcher.set_maximum_inflight(1);

        let send_transport = Arc::clone(&transport);
        let send_sleeper = Arc::clone(&sleeper);
        dispatcher.add_consumer(Arc::new(move |payload: Vec<u8>| {
            let transport = Arc::clone(&send_transport);
            let sleeper = Arc::clone(&send_sleeper);
            Box::pin(async move {
                let envelope = MessageEnvelope::from_bytes(&payload)?;
                transport
                    .publish(&envelope.kinds, &envelope.routing_key, &payload)
                    .await?;
                sleeper.reset();
                debug!("消息已送达broker: {}", envelope.kind());
                Ok(())
            })
        }));

        let fail_sleeper = Arc::clone(&sleeper);
        dispatcher.set_exception_handler(Arc::new(move |failure| {
            let sleeper = Arc::clone(&fail_sleeper);
            Box::pin(async move {
                match failure {
                    DispatchFailure::Consume(item, error) => {
                        sleeper.sleep_more().await;
                        if let Err(cancel_err) = item.cancel().await {
                            warn!("回退出站记录失败: {}", cancel_err);
                        }
                        warn!("Sender failed: {}", error);
                    }
                    DispatchFailure::Pull(error) => {
                        warn!("读取出站存储失败: {}", error);
                    }
                }
            })
        }));

        let node = Arc::new(Self {
            queue,
            outbox,
            dispatcher,
            hooks,
        });
        node.dispatcher.start();
        node
    }

    /// 发送消息，使用空路由键。不保证对方已接收。
    pub async fn send<M: Message>(&self, message: &M) -> MessagingResult<()> {
        self.send_with_key(message, "").await
    }

    /// 按路由键发送消息。写入持久存储即返回，broker不可用时
    /// 消息保留在存储中等待后台重试。
    pub async fn send_with_key<M: Message>(
        &self,
        message: &M,
        routing_key: &str,
    ) -> MessagingResult<()> {
        let envelope = MessageEnvelope::prepare(message, routing_key)?;
        let bytes = envelope.to_bytes()?;
        self.queue.enqueue(&bytes).await?;
        self.hooks.notify_sent(&envelope);
        Ok(())
    }

    /// 尚未送达broker的出站记录数
    pub async fn backlog(&self) -> usize {
        self.queue.length().await
    }

    /// 关闭发送节点：最多等待`timeout`排空出站存储后停止。
    /// 超时未送达的记录保留在持久存储中，不会被丢弃。
    pub async fn dispose(&self, timeout: Duration) {
        self.dispatcher.wait_for_empty_queue_and_stop(timeout).await;
        self.outbox.close().await;
    }
}
