use std::sync::Arc;
use std::time::Duration;

use messaging_domain::{BrokerTransport, EventHook, EventHookRegistry, UniqueEndpointGenerator};
use messaging_errors::{MessagingError, MessagingResult};
use messaging_infrastructure::{
    LoopbackTransport, SqliteOutbox, TransportFactory, TransportType,
};
use messaging_receiver::Receiver;
use messaging_sender::SenderNode;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::MessagingConfig;

/// 消息系统入口
///
/// 持有传输连接、事件钩子注册表、接收节点工厂和缓存的发送节点。
/// 节点列表与钩子列表都归本对象所有，随`configure`创建、
/// 随`shutdown`销毁，没有进程级的隐式全局状态。
pub struct MessagingSystem {
    config: MessagingConfig,
    transport: Arc<dyn BrokerTransport>,
    loopback: Option<Arc<LoopbackTransport>>,
    hooks: Arc<EventHookRegistry>,
    receiver: Arc<Receiver>,
    sender: Mutex<Option<Arc<SenderNode>>>,
}

impl MessagingSystem {
    /// 按配置初始化消息系统
    pub async fn configure(config: MessagingConfig) -> MessagingResult<Self> {
        config.validate()?;

        let (transport, loopback): (Arc<dyn BrokerTransport>, Option<Arc<LoopbackTransport>>) =
            match config.transport.r#type {
                TransportType::Loopback => {
                    let loopback = Arc::new(LoopbackTransport::new());
                    (
                        Arc::clone(&loopback) as Arc<dyn BrokerTransport>,
                        Some(loopback),
                    )
                }
                TransportType::Rabbitmq => {
                    (TransportFactory::create(&config.transport).await?, None)
                }
            };

        let endpoint_generator = if config.integration_test_mode {
            UniqueEndpointGenerator::integration_test_mode()
        } else {
            UniqueEndpointGenerator::new()
        };

        let hooks = Arc::new(EventHookRegistry::new());
        let receiver = Arc::new(Receiver::new(
            Arc::clone(&transport),
            Arc::clone(&hooks),
            endpoint_generator,
        ));
        receiver.set_purge_on_connect(config.purge_on_connect);
        receiver.set_delete_endpoints_on_shutdown(config.delete_endpoints_on_shutdown);
        receiver.set_concurrent_handlers(config.concurrent_handlers);

        info!(
            "消息系统已初始化，传输类型: {}",
            TransportFactory::get_type_string(&config.transport.r#type)
        );

        Ok(Self {
            config,
            transport,
            loopback,
            hooks,
            receiver,
            sender: Mutex::new(None),
        })
    }

    /// 回环模式：不连接broker，消息在进程内直接路由
    pub async fn loopback() -> MessagingResult<Self> {
        Self::configure(MessagingConfig::loopback()).await
    }

    /// 发送节点，整个系统实例共享一个
    pub async fn sender(&self) -> MessagingResult<Arc<SenderNode>> {
        let mut cached = self.sender.lock().await;
        if let Some(sender) = cached.as_ref() {
            return Ok(Arc::clone(sender));
        }

        let outbox = Arc::new(SqliteOutbox::open(&self.config.outbox.storage_path).await?);
        let sender = SenderNode::new(
            Arc::clone(&self.transport),
            outbox,
            Arc::clone(&self.hooks),
        );
        *cached = Some(Arc::clone(&sender));
        Ok(sender)
    }

    /// 接收节点工厂
    pub fn receiver(&self) -> Arc<Receiver> {
        Arc::clone(&self.receiver)
    }

    /// 注册一个事件钩子
    pub fn add_event_hook(&self, hook: Arc<dyn EventHook>) {
        self.hooks.add_hook(hook);
    }

    /// 移除全部事件钩子
    pub fn clear_event_hooks(&self) {
        self.hooks.clear();
    }

    /// 回环传输的直接句柄，只在回环模式下可用
    pub fn loopback_transport(&self) -> MessagingResult<Arc<LoopbackTransport>> {
        self.loopback.clone().ok_or_else(|| {
            MessagingError::Configuration("回环传输只在回环模式下可用".to_string())
        })
    }

    /// 关闭整个系统：停止所有接收节点，排空并停止发送节点，断开传输。
    /// 超时未送达的出站记录保留在持久存储中。
    pub async fn shutdown(&self) -> MessagingResult<()> {
        self.receiver.shutdown().await;

        if let Some(sender) = self.sender.lock().await.take() {
            sender
                .dispose(Duration::from_millis(self.config.shutdown_timeout_ms))
                .await;
        }

        self.transport.close().await?;
        info!("消息系统已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_system_exposes_loopback_transport() {
        let system = MessagingSystem::loopback().await.unwrap();
        assert!(system.loopback_transport().is_ok());
        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sender_is_cached_per_system() {
        let system = MessagingSystem::loopback().await.unwrap();

        let first = system.sender().await.unwrap();
        let second = system.sender().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let mut config = MessagingConfig::default();
        config.transport.url = "not-a-url".to_string();

        assert!(MessagingSystem::configure(config).await.is_err());
    }
}
