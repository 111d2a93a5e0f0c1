use std::sync::Arc;
use std::time::Duration;

use messaging_dispatcher::{Sleeper, WorkDispatcher};
use messaging_domain::{
    BrokerTransport, Endpoint, EventHookRegistry, Handler, Message, MessageEnvelope, WorkQueue,
};
use messaging_errors::MessagingResult;
use tracing::debug;

use crate::{handler_name, HandlerManager, PollingNode};

/// 接收节点：一个端点上的轮询队列、分发器和处理器表的组合
///
/// 用户把消息类型绑定到处理器时，绑定同时进入处理器表和轮询节点。
/// 竞争失败的节点以非激活状态创建，所有操作都是空操作。
pub struct ReceiverNode {
    endpoint: Endpoint,
    routing_key: String,
    polling_node: Arc<PollingNode>,
    dispatcher: Arc<WorkDispatcher<MessageEnvelope>>,
    handler_manager: Arc<HandlerManager>,
    active: bool,
}

impl ReceiverNode {
    pub(crate) fn new(
        transport: Arc<dyn BrokerTransport>,
        endpoint: Endpoint,
        routing_key: &str,
        hooks: Arc<EventHookRegistry>,
        concurrent_handlers: usize,
        active: bool,
    ) -> Arc<Self> {
        let sleeper = Arc::new(Sleeper::new());
        let polling_node = Arc::new(PollingNode::new(
            transport,
            endpoint.as_str(),
            routing_key,
            sleeper,
        ));
        let dispatcher = Arc::new(WorkDispatcher::new(
            Arc::clone(&polling_node) as Arc<dyn WorkQueue<MessageEnvelope>>
        ));
        dispatcher.set_maximum_inflight(concurrent_handlers);

        let handler_manager = Arc::new(HandlerManager::new(hooks));
        let manager = Arc::clone(&handler_manager);
        dispatcher.add_consumer(Arc::new(move |envelope: MessageEnvelope| {
            let manager = Arc::clone(&manager);
            Box::pin(async move { manager.try_handle(&envelope).await })
        }));

        Arc::new(Self {
            endpoint,
            routing_key: routing_key.to_string(),
            polling_node,
            dispatcher,
            handler_manager,
            active,
        })
    }

    /// 该节点消费的目的地队列名
    pub fn endpoint_name(&self) -> &str {
        self.endpoint.as_str()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 把消息类型绑定到处理器，并启动接收
    pub async fn handle<M, H>(&self, handler: Arc<H>) -> MessagingResult<()>
    where
        M: Message,
        H: Handler<M> + 'static,
    {
        if !self.active {
            debug!("节点未持有端点 {}，忽略绑定", self.endpoint);
            return Ok(());
        }

        self.handler_manager
            .add_handler::<M, H>(&self.routing_key, handler)?;
        self.polling_node.add_message_kind(M::kind()).await?;
        self.dispatcher.start();
        Ok(())
    }

    /// 从所有绑定中移除处理器，之后不再被调用
    pub fn unregister<H: 'static>(&self) {
        self.handler_manager.remove_handler(&handler_name::<H>());
    }

    /// 设置该节点的最大并发处理数
    pub fn set_concurrent_handlers(&self, max: usize) {
        self.dispatcher.set_maximum_inflight(max);
    }

    /// 停止该节点：轮询进入空闲，在处理的消息收尾后摘除处理器
    pub async fn dispose(&self) {
        if !self.active {
            return;
        }
        self.polling_node.stop();
        // 已拉取的投递等它的处理任务完成再停，不能无处理器地确认掉
        self.dispatcher
            .wait_for_empty_queue_and_stop(Duration::from_secs(5))
            .await;
        for name in self.handler_manager.all_handler_names() {
            self.handler_manager.remove_handler(&name);
        }
        debug!("接收节点已停止: {}", self.endpoint);
    }
}
