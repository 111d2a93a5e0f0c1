use std::collections::HashSet;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
};
use messaging_domain::{BrokerTransport, ExchangeKind, RawDelivery};
use messaging_errors::{MessagingError, MessagingResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// RabbitMQ传输实现
///
/// 每个消息类型对应一个topic交换机；目的地是绑定在交换机上的持久队列。
/// 已声明对象缓存在本地，`reset_routing_cache`清空缓存以便在broker侧
/// 状态被外部销毁后重新声明。
pub struct RabbitTransport {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    /// 已声明的交换机/队列/绑定，避免重复往返
    declared: StdMutex<HashSet<String>>,
    /// 本实例创建过的队列名，供remove_routing使用
    created_queues: StdMutex<HashSet<String>>,
    /// 本实例创建过的交换机名，供remove_routing使用
    created_exchanges: StdMutex<HashSet<String>>,
}

impl RabbitTransport {
    /// 连接RabbitMQ并打开通道
    pub async fn connect(url: &str) -> MessagingResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Broker(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::Broker(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", url);

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            declared: StdMutex::new(HashSet::new()),
            created_queues: StdMutex::new(HashSet::new()),
            created_exchanges: StdMutex::new(HashSet::new()),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 按broker返回的错误码分类：404是可恢复的"目的地不存在"，
    /// 406是可恢复的"无法确认"，其余一律视为致命错误
    fn classify(context: &str, e: lapin::Error) -> MessagingError {
        let message = e.to_string();
        if message.contains("NOT_FOUND") || message.contains("404") {
            MessagingError::DestinationMissing(format!("{context}: {message}"))
        } else if message.contains("PRECONDITION_FAILED") || message.contains("406") {
            MessagingError::NotAcknowledgable(format!("{context}: {message}"))
        } else {
            MessagingError::Broker(format!("{context}: {message}"))
        }
    }

    /// 通道因错误关闭后重新打开
    async fn healthy_channel(&self) -> MessagingResult<Channel> {
        let mut guard = self.channel.lock().await;
        if !guard.status().connected() {
            debug!("通道已关闭，重新创建");
            *guard = self
                .connection
                .create_channel()
                .await
                .map_err(|e| MessagingError::Broker(format!("创建通道失败: {e}")))?;
        }
        Ok(guard.clone())
    }

    fn already_declared(&self, key: &str) -> bool {
        self.declared.lock().unwrap().contains(key)
    }

    fn mark_declared(&self, key: String) {
        self.declared.lock().unwrap().insert(key);
    }

    async fn declare_exchange(&self, channel: &Channel, name: &str) -> MessagingResult<()> {
        let cache_key = format!("exchange:{name}");
        if self.already_declared(&cache_key) {
            return Ok(());
        }

        channel
            .exchange_declare(
                name,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Self::classify(&format!("声明交换机 {name} 失败"), e))?;

        self.mark_declared(cache_key);
        self.created_exchanges.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, channel: &Channel, name: &str) -> MessagingResult<()> {
        let cache_key = format!("queue:{name}");
        if self.already_declared(&cache_key) {
            return Ok(());
        }

        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Self::classify(&format!("声明队列 {name} 失败"), e))?;

        self.mark_declared(cache_key);
        self.created_queues.lock().unwrap().insert(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for RabbitTransport {
    async fn create_destination(
        &self,
        source_kind: &str,
        destination: &str,
        routing_key: &str,
        _exchange_kind: ExchangeKind,
    ) -> MessagingResult<()> {
        let channel = self.healthy_channel().await?;

        self.declare_exchange(&channel, source_kind).await?;
        self.declare_queue(&channel, destination).await?;

        let cache_key = format!("bind:{source_kind}:{destination}:{routing_key}");
        if self.already_declared(&cache_key) {
            return Ok(());
        }

        channel
            .queue_bind(
                destination,
                source_kind,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Self::classify(&format!("绑定队列 {destination} 到 {source_kind} 失败"), e)
            })?;

        self.mark_declared(cache_key);
        debug!(
            "Destination bound: {} -> {} (key: {})",
            source_kind, destination, routing_key
        );
        Ok(())
    }

    async fn publish(
        &self,
        kinds: &[String],
        routing_key: &str,
        payload: &[u8],
    ) -> MessagingResult<()> {
        let concrete = kinds
            .first()
            .ok_or_else(|| MessagingError::Internal("消息没有声明任何类型".to_string()))?;

        let channel = self.healthy_channel().await?;
        self.declare_exchange(&channel, concrete).await?;

        // 把具体类型的交换机路由到每个父类别的交换机
        for parent in kinds.iter().skip(1) {
            self.declare_exchange(&channel, parent).await?;

            let cache_key = format!("link:{concrete}:{parent}");
            if !self.already_declared(&cache_key) {
                channel
                    .exchange_bind(
                        parent,
                        concrete,
                        "#",
                        ExchangeBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        Self::classify(&format!("绑定交换机 {concrete} 到 {parent} 失败"), e)
                    })?;
                self.mark_declared(cache_key);
            }
        }

        let confirm = channel
            .basic_publish(
                concrete,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2), // 2 = persistent
            )
            .await
            .map_err(|e| Self::classify(&format!("发布消息到 {concrete} 失败"), e))?;

        confirm
            .await
            .map_err(|e| Self::classify("消息发布确认失败", e))?;

        debug!("消息已发布到交换机: {}", concrete);
        Ok(())
    }

    async fn pull_one(&self, destination: &str) -> MessagingResult<Option<RawDelivery>> {
        let channel = self.healthy_channel().await?;

        let delivery = channel
            .basic_get(destination, BasicGetOptions::default())
            .await
            .map_err(|e| Self::classify(&format!("从队列 {destination} 获取消息失败"), e))?;

        match delivery {
            Some(delivery) => Ok(Some(RawDelivery {
                payload: delivery.data.clone(),
                delivery_tag: delivery.delivery_tag,
            })),
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        let channel = self.healthy_channel().await?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| Self::classify("确认消息失败", e))
    }

    async fn nack(&self, delivery_tag: u64) -> MessagingResult<()> {
        let channel = self.healthy_channel().await?;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Self::classify("拒绝消息失败", e))
    }

    async fn purge(&self, destination: &str) -> MessagingResult<()> {
        let channel = self.healthy_channel().await?;
        channel
            .queue_purge(destination, QueuePurgeOptions::default())
            .await
            .map_err(|e| Self::classify(&format!("清空队列 {destination} 失败"), e))?;

        debug!("队列 {} 已清空", destination);
        Ok(())
    }

    async fn remove_routing(
        &self,
        filter: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> MessagingResult<()> {
        let channel = self.healthy_channel().await?;

        let queues: Vec<String> = {
            let created = self.created_queues.lock().unwrap();
            created.iter().filter(|n| filter(n)).cloned().collect()
        };
        for queue in queues {
            if let Err(e) = channel
                .queue_delete(&queue, QueueDeleteOptions::default())
                .await
            {
                warn!("删除队列 {} 失败: {}", queue, e);
            }
            self.created_queues.lock().unwrap().remove(&queue);
        }

        let exchanges: Vec<String> = {
            let created = self.created_exchanges.lock().unwrap();
            created.iter().filter(|n| filter(n)).cloned().collect()
        };
        for exchange in exchanges {
            if let Err(e) = channel
                .exchange_delete(&exchange, ExchangeDeleteOptions::default())
                .await
            {
                warn!("删除交换机 {} 失败: {}", exchange, e);
            }
            self.created_exchanges.lock().unwrap().remove(&exchange);
        }

        self.reset_routing_cache();
        Ok(())
    }

    fn reset_routing_cache(&self) {
        self.declared.lock().unwrap().clear();
    }

    async fn close(&self) -> MessagingResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| MessagingError::Broker(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
