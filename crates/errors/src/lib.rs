use thiserror::Error;


#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("消息队列错误: {0}")]
    Broker(String),
    #[error("目标队列不存在: {0}")]
    DestinationMissing(String),
    #[error("消息无法确认: {0}")]
    NotAcknowledgable(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("持久化存储错误: {0}")]
    Storage(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("路由绑定已存在: {kind} / {routing_key}")]
    DuplicateBinding { kind: String, routing_key: String },
    #[error("路由绑定未注册: {kind} / {routing_key}")]
    BindingNotRegistered { kind: String, routing_key: String },
    #[error("处理器执行失败: {handler}: {message}")]
    HandlerFailed { handler: String, message: String },
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

impl MessagingError {
    pub fn broker<S: Into<String>>(msg: S) -> Self {
        Self::Broker(msg.into())
    }
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn handler_failed<S: Into<String>, M: Into<String>>(handler: S, message: M) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// 可在轮询循环内自行恢复的broker状态，不向调用方传播
    pub fn is_recoverable_broker_condition(&self) -> bool {
        matches!(
            self,
            MessagingError::DestinationMissing(_) | MessagingError::NotAcknowledgable(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MessagingError::Internal(_)
                | MessagingError::Configuration(_)
                | MessagingError::Serialization(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MessagingError::Broker(_) | MessagingError::Storage(_) | MessagingError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for MessagingError {
    fn from(err: anyhow::Error) -> Self {
        MessagingError::Internal(err.to_string())
    }
}
