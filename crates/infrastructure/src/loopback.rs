use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use messaging_domain::{BrokerTransport, ExchangeKind, RawDelivery, WILDCARD_ROUTING_KEY};
use messaging_errors::{MessagingError, MessagingResult};
use tracing::debug;

/// 进程内回环传输
///
/// 与broker实现同一能力集合，路由匹配语义保持一致：
/// 绑定类型属于消息声明的类型集合，且路由键相等或为通配符。
/// 同一次发布对每个目的地最多投递一份。仅用于测试与回环模式。
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

#[derive(Default)]
struct LoopbackState {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    bindings: Vec<LoopbackBindingEntry>,
    /// 已拉取未确认的投递：delivery_tag -> (队列名, 内容)
    pending: HashMap<u64, (String, Vec<u8>)>,
    next_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LoopbackBindingEntry {
    source_kind: String,
    destination: String,
    routing_key: String,
}

impl LoopbackBindingEntry {
    fn matches(&self, kinds: &[String], routing_key: &str) -> bool {
        kinds.iter().any(|k| k == &self.source_kind)
            && (self.routing_key == routing_key || self.routing_key == WILDCARD_ROUTING_KEY)
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// 当前绑定数量，供测试检查重建是否幂等
    pub fn binding_count(&self) -> usize {
        self.state.lock().unwrap().bindings.len()
    }

    /// 已存在的队列名
    pub fn queue_names(&self) -> Vec<String> {
        self.state.lock().unwrap().queues.keys().cloned().collect()
    }

    /// 队列中排队的消息数，不含已拉取未确认的
    pub fn queue_depth(&self, destination: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(destination)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// 已拉取未确认的投递数
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for LoopbackTransport {
    async fn create_destination(
        &self,
        source_kind: &str,
        destination: &str,
        routing_key: &str,
        _exchange_kind: ExchangeKind,
    ) -> MessagingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(destination.to_string()).or_default();

        let entry = LoopbackBindingEntry {
            source_kind: source_kind.to_string(),
            destination: destination.to_string(),
            routing_key: routing_key.to_string(),
        };
        // 重复创建同一绑定是空操作
        if !state.bindings.contains(&entry) {
            debug!(
                "Loopback binding created: {} -> {} (key: {})",
                source_kind, destination, routing_key
            );
            state.bindings.push(entry);
        }
        Ok(())
    }

    async fn publish(
        &self,
        kinds: &[String],
        routing_key: &str,
        payload: &[u8],
    ) -> MessagingResult<()> {
        let mut state = self.state.lock().unwrap();

        // 每个目的地最多投递一份，即使多个绑定同时命中
        let mut destinations: Vec<String> = Vec::new();
        for binding in &state.bindings {
            if binding.matches(kinds, routing_key) && !destinations.contains(&binding.destination) {
                destinations.push(binding.destination.clone());
            }
        }

        for destination in destinations {
            state
                .queues
                .entry(destination)
                .or_default()
                .push_back(payload.to_vec());
        }
        Ok(())
    }

    async fn pull_one(&self, destination: &str) -> MessagingResult<Option<RawDelivery>> {
        let mut state = self.state.lock().unwrap();
        let popped = match state.queues.get_mut(destination) {
            Some(queue) => queue.pop_front(),
            None => return Err(MessagingError::DestinationMissing(destination.to_string())),
        };

        match popped {
            Some(payload) => {
                state.next_tag += 1;
                let tag = state.next_tag;
                state
                    .pending
                    .insert(tag, (destination.to_string(), payload.clone()));
                Ok(Some(RawDelivery {
                    payload,
                    delivery_tag: tag,
                }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.pending.remove(&delivery_tag).is_none() {
            return Err(MessagingError::NotAcknowledgable(format!(
                "delivery tag {delivery_tag}"
            )));
        }
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64) -> MessagingResult<()> {
        let mut state = self.state.lock().unwrap();
        let (destination, payload) = state.pending.remove(&delivery_tag).ok_or_else(|| {
            MessagingError::NotAcknowledgable(format!("delivery tag {delivery_tag}"))
        })?;
        // 重投到队首，下一次拉取优先拿到
        state
            .queues
            .entry(destination)
            .or_default()
            .push_front(payload);
        Ok(())
    }

    async fn purge(&self, destination: &str) -> MessagingResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.queues.get_mut(destination) {
            queue.clear();
        }
        Ok(())
    }

    async fn remove_routing(
        &self,
        filter: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> MessagingResult<()> {
        let mut state = self.state.lock().unwrap();
        let doomed: HashSet<String> = state
            .queues
            .keys()
            .filter(|name| filter(name))
            .cloned()
            .collect();

        state.queues.retain(|name, _| !doomed.contains(name));
        state.bindings.retain(|b| !doomed.contains(&b.destination));
        Ok(())
    }

    fn reset_routing_cache(&self) {
        // 回环模式没有需要重建的远端状态
    }

    async fn close(&self) -> MessagingResult<()> {
        Ok(())
    }
}
