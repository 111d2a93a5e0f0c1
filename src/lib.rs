//! 消息中间件客户端
//!
//! 发布方把类型化消息发送到命名或匿名端点，订阅方把处理器绑定到
//! 消息类型上，获得至少一次投递和有界并发的处理执行。发送路径
//! 经过持久化的本地缓冲，broker不可用时发布方不被阻塞；接收路径
//! 使用带自适应退避的拉取循环，并在broker侧状态丢失后自动重建路由。

pub mod app;
pub mod config;
pub mod logging;

pub use app::MessagingSystem;
pub use config::MessagingConfig;
pub use logging::init_logging;

pub use messaging_dispatcher::{Sleeper, WorkDispatcher, DEFAULT_CONCURRENT_HANDLERS};
pub use messaging_domain::{
    BindingKey, BindingTable, BrokerTransport, Completion, Endpoint, EventHook, EventHookRegistry,
    ExchangeKind, Handler, LoggingEventHook, Message, MessageEnvelope, UniqueEndpointGenerator,
    WorkItem, WorkQueue, WILDCARD_ROUTING_KEY,
};
pub use messaging_errors::{MessagingError, MessagingResult};
pub use messaging_infrastructure::{
    LoopbackTransport, OutboxConfig, SqliteOutbox, TransportConfig, TransportFactory, TransportType,
};
pub use messaging_receiver::{Receiver, ReceiverNode};
pub use messaging_sender::SenderNode;
