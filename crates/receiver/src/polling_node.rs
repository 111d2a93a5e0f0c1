use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use messaging_dispatcher::Sleeper;
use messaging_domain::{
    BrokerTransport, Completion, ExchangeKind, MessageEnvelope, WorkItem, WorkQueue,
};
use messaging_errors::MessagingResult;
use tracing::{debug, warn};

/// 拉取式的broker工作队列
///
/// 对分发器表现为一个队列，实际在被拉取时向broker请求，
/// 并按需重建broker侧的路由状态。没有绑定任何消息类型时
/// 立即退避，绝不对broker空转。
pub struct PollingNode {
    transport: Arc<dyn BrokerTransport>,
    endpoint: String,
    routing_key: String,
    bound_kinds: Mutex<Vec<String>>,
    sleeper: Arc<Sleeper>,
}

impl PollingNode {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        endpoint: &str,
        routing_key: &str,
        sleeper: Arc<Sleeper>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.to_string(),
            routing_key: routing_key.to_string(),
            bound_kinds: Mutex::new(Vec::new()),
            sleeper,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 注册该端点应当接收的消息类型，并重建此端点的全部绑定。
    /// broker侧状态可能被外部销毁，所以每次都重建所有已注册类型。
    pub async fn add_message_kind(&self, kind: &str) -> MessagingResult<()> {
        {
            let mut bound = self.bound_kinds.lock().unwrap();
            if !bound.iter().any(|k| k == kind) {
                bound.push(kind.to_string());
            }
        }
        self.rebuild_bindings().await
    }

    /// 停止接收：清空绑定类型，后续拉取直接退避
    pub fn stop(&self) {
        self.bound_kinds.lock().unwrap().clear();
        debug!("轮询节点已停止: {}", self.endpoint);
    }

    pub fn bound_kind_count(&self) -> usize {
        self.bound_kinds.lock().unwrap().len()
    }

    async fn rebuild_bindings(&self) -> MessagingResult<()> {
        self.transport.reset_routing_cache();
        let kinds: Vec<String> = self.bound_kinds.lock().unwrap().clone();
        for kind in kinds {
            self.transport
                .create_destination(&kind, &self.endpoint, &self.routing_key, ExchangeKind::Topic)
                .await?;
        }
        Ok(())
    }
}

struct BrokerCompletion {
    transport: Arc<dyn BrokerTransport>,
    delivery_tag: u64,
}

#[async_trait]
impl Completion for BrokerCompletion {
    async fn finish(&self) -> MessagingResult<()> {
        self.transport.ack(self.delivery_tag).await
    }

    async fn cancel(&self) -> MessagingResult<()> {
        self.transport.nack(self.delivery_tag).await
    }
}

#[async_trait]
impl WorkQueue<MessageEnvelope> for PollingNode {
    async fn try_dequeue(&self) -> MessagingResult<Option<WorkItem<MessageEnvelope>>> {
        if self.bound_kinds.lock().unwrap().is_empty() {
            self.sleeper.sleep_more().await;
            return Ok(None);
        }

        match self.transport.pull_one(&self.endpoint).await {
            Ok(Some(delivery)) => {
                self.sleeper.reset();
                let envelope = MessageEnvelope::from_bytes(&delivery.payload)?;
                Ok(Some(WorkItem::new(
                    envelope,
                    Arc::new(BrokerCompletion {
                        transport: Arc::clone(&self.transport),
                        delivery_tag: delivery.delivery_tag,
                    }),
                )))
            }
            Ok(None) => {
                self.sleeper.sleep_more().await;
                Ok(None)
            }
            Err(e) if matches!(e, messaging_errors::MessagingError::DestinationMissing(_)) => {
                // broker侧队列丢失，重建后下一轮再取
                debug!("目的地缺失，重建绑定: {}", self.endpoint);
                self.rebuild_bindings().await?;
                Ok(None)
            }
            Err(e) if matches!(e, messaging_errors::MessagingError::NotAcknowledgable(_)) => {
                warn!("broker报告了无法确认的消息: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 近似值，broker侧长度未知时返回0
    async fn length(&self) -> usize {
        0
    }

    async fn block_until_ready(&self) -> bool {
        true
    }
}
