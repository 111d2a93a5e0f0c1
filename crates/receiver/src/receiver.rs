use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use messaging_dispatcher::DEFAULT_CONCURRENT_HANDLERS;
use messaging_domain::{
    BrokerTransport, Endpoint, EventHookRegistry, UniqueEndpointGenerator, INTEGRATION_MARKER,
    LISTENER_SUFFIX, TEST_LISTENER_PREFIX,
};
use messaging_errors::MessagingResult;
use tracing::{debug, info, warn};

use crate::ReceiverNode;

/// 接收节点工厂
///
/// 提供两种端点选择：`listen`使用一次性唯一端点（每个监听器都收到
/// 全部消息），`take_from`使用命名端点（同名监听器竞争消费）。
/// 同一个命名端点只有第一次注册真正持有它，后续注册得到的是
/// 不接收消息的占位节点。
pub struct Receiver {
    transport: Arc<dyn BrokerTransport>,
    hooks: Arc<EventHookRegistry>,
    endpoint_generator: UniqueEndpointGenerator,
    registered_nodes: Mutex<Vec<Arc<ReceiverNode>>>,
    claimed_endpoints: Mutex<HashSet<String>>,
    purge_on_connect: AtomicBool,
    delete_endpoints_on_shutdown: AtomicBool,
    default_concurrent_handlers: AtomicUsize,
}

impl Receiver {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        hooks: Arc<EventHookRegistry>,
        endpoint_generator: UniqueEndpointGenerator,
    ) -> Self {
        Self {
            transport,
            hooks,
            endpoint_generator,
            registered_nodes: Mutex::new(Vec::new()),
            claimed_endpoints: Mutex::new(HashSet::new()),
            purge_on_connect: AtomicBool::new(false),
            delete_endpoints_on_shutdown: AtomicBool::new(false),
            default_concurrent_handlers: AtomicUsize::new(DEFAULT_CONCURRENT_HANDLERS),
        }
    }

    /// 在唯一端点上创建监听节点，所有这样创建的监听器都收到全部消息
    pub async fn listen(&self) -> MessagingResult<Arc<ReceiverNode>> {
        self.listen_with_key("").await
    }

    pub async fn listen_with_key(&self, routing_key: &str) -> MessagingResult<Arc<ReceiverNode>> {
        let endpoint = self.endpoint_generator.generate();
        self.take_from_with_key(endpoint, routing_key).await
    }

    /// 在命名端点上创建监听节点，同名监听器竞争消费
    pub async fn take_from(&self, endpoint: Endpoint) -> MessagingResult<Arc<ReceiverNode>> {
        self.take_from_with_key(endpoint, "").await
    }

    pub async fn take_from_with_key(
        &self,
        endpoint: Endpoint,
        routing_key: &str,
    ) -> MessagingResult<Arc<ReceiverNode>> {
        let claimed = self
            .claimed_endpoints
            .lock()
            .unwrap()
            .insert(endpoint.as_str().to_string());

        if !claimed {
            // 端点已被本进程的其他监听器持有，返回占位节点
            debug!("端点 {} 已被占用，返回占位节点", endpoint);
            return Ok(ReceiverNode::new(
                Arc::clone(&self.transport),
                endpoint,
                routing_key,
                Arc::clone(&self.hooks),
                self.default_concurrent_handlers.load(Ordering::SeqCst),
                false,
            ));
        }

        if self.purge_on_connect.load(Ordering::SeqCst) {
            if let Err(e) = self.transport.purge(endpoint.as_str()).await {
                if e.is_recoverable_broker_condition() {
                    debug!("清空端点 {} 时队列不存在，跳过", endpoint);
                } else {
                    // 节点没有建立，持有记录一并回退
                    self.claimed_endpoints
                        .lock()
                        .unwrap()
                        .remove(endpoint.as_str());
                    return Err(e);
                }
            }
        }

        let node = ReceiverNode::new(
            Arc::clone(&self.transport),
            endpoint,
            routing_key,
            Arc::clone(&self.hooks),
            self.default_concurrent_handlers.load(Ordering::SeqCst),
            true,
        );
        self.registered_nodes.lock().unwrap().push(Arc::clone(&node));
        Ok(node)
    }

    /// 从关闭列表中摘除并停止一个节点
    pub async fn remove(&self, node: &Arc<ReceiverNode>) {
        let found = {
            let mut nodes = self.registered_nodes.lock().unwrap();
            let before = nodes.len();
            nodes.retain(|n| !Arc::ptr_eq(n, node));
            before != nodes.len()
        };
        if found {
            self.claimed_endpoints
                .lock()
                .unwrap()
                .remove(node.endpoint_name());
            node.dispose().await;
        }
    }

    /// 设置所有已注册节点以及后续新节点的最大并发处理数
    pub fn set_concurrent_handlers(&self, max: usize) {
        self.default_concurrent_handlers
            .store(max.max(1), Ordering::SeqCst);
        for node in self.registered_nodes.lock().unwrap().iter() {
            node.set_concurrent_handlers(max);
        }
    }

    /// 注册处理器时是否先清空端点中的积压消息，集成测试用
    pub fn set_purge_on_connect(&self, purge: bool) {
        self.purge_on_connect.store(purge, Ordering::SeqCst);
    }

    /// 关闭时是否删除集成模式生成的端点
    pub fn set_delete_endpoints_on_shutdown(&self, delete: bool) {
        self.delete_endpoints_on_shutdown
            .store(delete, Ordering::SeqCst);
    }

    /// 当前已注册的节点数
    pub fn node_count(&self) -> usize {
        self.registered_nodes.lock().unwrap().len()
    }

    /// 关闭所有已创建的接收节点
    pub async fn shutdown(&self) {
        let nodes: Vec<Arc<ReceiverNode>> = {
            let mut registered = self.registered_nodes.lock().unwrap();
            registered.drain(..).collect()
        };
        for node in &nodes {
            node.dispose().await;
        }
        self.claimed_endpoints.lock().unwrap().clear();

        if self.delete_endpoints_on_shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.transport.remove_routing(&Self::delete_name_filter).await {
                warn!("删除集成端点失败: {}", e);
            }
        }
        info!("接收端已关闭，停止 {} 个节点", nodes.len());
    }

    /// 判断端点名在关闭清理时是否应当删除
    pub fn delete_name_filter(queue_name: &str) -> bool {
        let name = queue_name.to_lowercase();
        name.contains(INTEGRATION_MARKER)
            || name.ends_with(LISTENER_SUFFIX)
            || name.starts_with(TEST_LISTENER_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use messaging_domain::{Handler, Message, MessageEnvelope};
    use messaging_infrastructure::LoopbackTransport;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ColourMessage {
        correlation_id: Uuid,
    }

    impl Message for ColourMessage {
        fn kind() -> &'static str {
            "colour-message"
        }

        fn correlation_id(&self) -> Uuid {
            self.correlation_id
        }
    }

    struct CountingHandler {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler<ColourMessage> for CountingHandler {
        async fn handle(&self, _message: ColourMessage) -> MessagingResult<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn receiver_over(transport: Arc<LoopbackTransport>) -> Receiver {
        Receiver::new(
            transport as Arc<dyn BrokerTransport>,
            Arc::new(EventHookRegistry::new()),
            UniqueEndpointGenerator::integration_test_mode(),
        )
    }

    #[test]
    fn test_delete_name_filter_matches_disposable_names() {
        assert!(Receiver::delete_name_filter("orders.integration.audit"));
        assert!(Receiver::delete_name_filter(
            "host_42_abcd1234_messaging_listener"
        ));
        assert!(Receiver::delete_name_filter("test_listener_host_42"));
        assert!(Receiver::delete_name_filter("Test_Listener_UPPER"));

        assert!(!Receiver::delete_name_filter("orders"));
        assert!(!Receiver::delete_name_filter("production_billing_queue"));
    }

    #[tokio::test]
    async fn test_second_take_from_on_same_endpoint_gets_placeholder() {
        let transport = Arc::new(LoopbackTransport::new());
        let receiver = receiver_over(Arc::clone(&transport));

        let first = receiver
            .take_from(Endpoint::new("shared-endpoint"))
            .await
            .unwrap();
        let second = receiver
            .take_from(Endpoint::new("shared-endpoint"))
            .await
            .unwrap();

        assert!(first.is_active());
        assert!(!second.is_active());
        assert_eq!(receiver.node_count(), 1);
    }

    #[tokio::test]
    async fn test_listen_nodes_are_always_active() {
        let transport = Arc::new(LoopbackTransport::new());
        let receiver = receiver_over(Arc::clone(&transport));

        let first = receiver.listen().await.unwrap();
        let second = receiver.listen().await.unwrap();

        assert!(first.is_active());
        assert!(second.is_active());
        assert_ne!(first.endpoint_name(), second.endpoint_name());
    }

    #[tokio::test]
    async fn test_shutdown_disposes_nodes_and_deletes_test_endpoints() {
        let transport = Arc::new(LoopbackTransport::new());
        let receiver = receiver_over(Arc::clone(&transport));
        receiver.set_delete_endpoints_on_shutdown(true);

        let node = receiver.listen().await.unwrap();
        let invocations = Arc::new(AtomicUsize::new(0));
        node.handle::<ColourMessage, _>(Arc::new(CountingHandler {
            invocations: Arc::clone(&invocations),
        }))
        .await
        .unwrap();
        assert!(!transport.queue_names().is_empty());

        receiver.shutdown().await;

        assert_eq!(receiver.node_count(), 0);
        assert!(transport.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_purge_on_connect_discards_backlog() {
        let transport = Arc::new(LoopbackTransport::new());

        // 端点里先积压一条消息
        transport
            .create_destination(
                "colour-message",
                "shared-endpoint",
                "#",
                messaging_domain::ExchangeKind::Topic,
            )
            .await
            .unwrap();
        let stale = MessageEnvelope::prepare(
            &ColourMessage {
                correlation_id: Uuid::new_v4(),
            },
            "",
        )
        .unwrap();
        transport
            .publish(&stale.kinds, "", &stale.to_bytes().unwrap())
            .await
            .unwrap();
        assert_eq!(transport.queue_depth("shared-endpoint"), 1);

        let receiver = receiver_over(Arc::clone(&transport));
        receiver.set_purge_on_connect(true);
        let _node = receiver
            .take_from(Endpoint::new("shared-endpoint"))
            .await
            .unwrap();

        assert_eq!(transport.queue_depth("shared-endpoint"), 0);
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_releases_claim_for_reuse() {
        let transport = Arc::new(LoopbackTransport::new());
        let receiver = receiver_over(Arc::clone(&transport));

        let node = receiver
            .take_from(Endpoint::new("shared-endpoint"))
            .await
            .unwrap();
        receiver.remove(&node).await;
        assert_eq!(receiver.node_count(), 0);

        // 端点释放后可以再次被持有
        let replacement = receiver
            .take_from(Endpoint::new("shared-endpoint"))
            .await
            .unwrap();
        assert!(replacement.is_active());

        receiver.shutdown().await;
    }
}
