use chrono::{DateTime, Utc};
use messaging_errors::MessagingResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 匹配任意路由键的通配符
pub const WILDCARD_ROUTING_KEY: &str = "#";

/// 可发送消息的统一接口
///
/// 每个消息类型声明自己的具体类型名（同时作为broker侧的交换机名）、
/// 所属的全部类别，以及一个在构造时分配、之后不再变化的关联标识。
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 具体类型名，第一个发布目标
    fn kind() -> &'static str;

    /// 该消息所属的全部类型名：第一个为具体类型，其余为父类别。
    /// 投递匹配基于这个封闭集合，而不是运行时类型内省。
    fn kinds() -> Vec<&'static str> {
        vec![Self::kind()]
    }

    /// 每条逻辑消息唯一的关联标识
    fn correlation_id(&self) -> Uuid;
}

/// 序列化后的消息信封，发送与接收路径共用的线上格式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    /// 消息所属的全部类型名，第一个为具体类型
    pub kinds: Vec<String>,
    pub routing_key: String,
    pub correlation_id: Uuid,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// 为发送准备信封
    pub fn prepare<M: Message>(message: &M, routing_key: &str) -> MessagingResult<Self> {
        let payload = serde_json::to_value(message)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            kinds: M::kinds().into_iter().map(String::from).collect(),
            routing_key: routing_key.to_string(),
            correlation_id: message.correlation_id(),
            payload,
            sent_at: Utc::now(),
        })
    }

    /// 具体消息类型名
    pub fn kind(&self) -> &str {
        self.kinds.first().map(String::as_str).unwrap_or("")
    }

    /// 将信封内容还原为具体消息类型
    pub fn decode<M: Message>(&self) -> MessagingResult<M> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> MessagingResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PingMessage {
        correlation_id: Uuid,
        note: String,
    }

    impl Message for PingMessage {
        fn kind() -> &'static str {
            "ping-message"
        }

        fn kinds() -> Vec<&'static str> {
            vec!["ping-message", "diagnostic-message"]
        }

        fn correlation_id(&self) -> Uuid {
            self.correlation_id
        }
    }

    #[test]
    fn test_prepare_carries_kinds_and_correlation_id() {
        let message = PingMessage {
            correlation_id: Uuid::new_v4(),
            note: "hello".to_string(),
        };

        let envelope = MessageEnvelope::prepare(&message, "audit").unwrap();

        assert_eq!(envelope.kind(), "ping-message");
        assert_eq!(envelope.kinds, vec!["ping-message", "diagnostic-message"]);
        assert_eq!(envelope.routing_key, "audit");
        assert_eq!(envelope.correlation_id, message.correlation_id);
    }

    #[test]
    fn test_envelope_bytes_round_trip() {
        let message = PingMessage {
            correlation_id: Uuid::new_v4(),
            note: "round trip".to_string(),
        };

        let envelope = MessageEnvelope::prepare(&message, "").unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let restored = MessageEnvelope::from_bytes(&bytes).unwrap();

        assert_eq!(restored.id, envelope.id);
        assert_eq!(restored.kinds, envelope.kinds);
        assert_eq!(restored.correlation_id, envelope.correlation_id);

        let decoded: PingMessage = restored.decode().unwrap();
        assert_eq!(decoded.note, "round trip");
        assert_eq!(decoded.correlation_id, message.correlation_id);
    }

    #[test]
    fn test_decode_rejects_mismatched_payload() {
        let envelope = MessageEnvelope {
            id: Uuid::new_v4().to_string(),
            kinds: vec!["ping-message".to_string()],
            routing_key: String::new(),
            correlation_id: Uuid::new_v4(),
            payload: serde_json::json!({ "unexpected": true }),
            sent_at: Utc::now(),
        };

        assert!(envelope.decode::<PingMessage>().is_err());
    }
}
