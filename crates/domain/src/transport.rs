use async_trait::async_trait;
use messaging_errors::MessagingResult;

/// broker侧交换机类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Direct,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

/// 从broker拉取到的一条原始投递
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub payload: Vec<u8>,
    pub delivery_tag: u64,
}

/// broker传输接口
///
/// broker客户端与进程内回环实现同一能力集合，两者在路由匹配上的
/// 行为必须一致。错误分两类上报：`DestinationMissing`与
/// `NotAcknowledgable`是可在轮询循环内恢复的状态，其余一律视为
/// 致命传输错误。
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// 创建目的地队列，并把它绑定到消息类型对应的交换机上。
    /// 重复创建同一绑定必须是空操作。
    async fn create_destination(
        &self,
        source_kind: &str,
        destination: &str,
        routing_key: &str,
        exchange_kind: ExchangeKind,
    ) -> MessagingResult<()>;

    /// 发布一条消息。`kinds`的第一个元素是具体类型（发布目标交换机），
    /// 其余为父类别，实现负责把具体类型路由到各父类别。
    async fn publish(
        &self,
        kinds: &[String],
        routing_key: &str,
        payload: &[u8],
    ) -> MessagingResult<()>;

    /// 拉取一条待处理投递，队列为空时返回None
    async fn pull_one(&self, destination: &str) -> MessagingResult<Option<RawDelivery>>;

    /// 确认投递，从broker中移除
    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()>;

    /// 否定确认，按broker策略重投
    async fn nack(&self, delivery_tag: u64) -> MessagingResult<()>;

    /// 清空目的地队列中的全部消息
    async fn purge(&self, destination: &str) -> MessagingResult<()>;

    /// 删除名称匹配过滤器的队列与绑定
    async fn remove_routing(
        &self,
        filter: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> MessagingResult<()>;

    /// 丢弃已声明路由对象的缓存。重建绑定前调用，
    /// 保证broker侧状态被外部破坏后也能重新声明。
    fn reset_routing_cache(&self);

    async fn close(&self) -> MessagingResult<()>;
}
