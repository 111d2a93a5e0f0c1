use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use messaging_domain::{
    BindingKey, BindingTable, EventHookRegistry, Handler, Message, MessageEnvelope,
};
use messaging_errors::MessagingResult;
use tracing::debug;

/// 处理器的类型名，绑定表中的标识
pub fn handler_name<H: ?Sized>() -> String {
    std::any::type_name::<H>().to_string()
}

/// 类型擦除后的处理器调用入口
#[async_trait]
trait ErasedHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, envelope: &MessageEnvelope) -> MessagingResult<()>;
}

/// 把类型化的Handler<M>适配成按信封调用
struct TypedHandler<M, H> {
    name: String,
    handler: Arc<H>,
    _marker: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H> ErasedHandler for TypedHandler<M, H>
where
    M: Message,
    H: Handler<M> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, envelope: &MessageEnvelope) -> MessagingResult<()> {
        let message: M = envelope.decode()?;
        self.handler.handle(message).await
    }
}

struct ManagerState {
    bindings: BindingTable,
    /// (声明类型, 处理器名) -> 调用入口；同一个处理器可以
    /// 以不同的声明类型绑定多次，各自按声明类型还原消息
    handlers: HashMap<(String, String), Arc<dyn ErasedHandler>>,
}

/// 把一条入站消息变成零个或多个处理器调用
///
/// 维护绑定表和处理器实例注册；命中多个绑定时向全部处理器扇出，
/// 单个处理器的失败被隔离上报，不影响其余处理器，也不影响消息确认。
pub struct HandlerManager {
    state: Mutex<ManagerState>,
    hooks: Arc<EventHookRegistry>,
}

impl HandlerManager {
    pub fn new(hooks: Arc<EventHookRegistry>) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                bindings: BindingTable::new(),
                handlers: HashMap::new(),
            }),
            hooks,
        }
    }

    /// 把处理器绑定到(消息类型, 路由键)上
    pub fn add_handler<M, H>(&self, routing_key: &str, handler: Arc<H>) -> MessagingResult<()>
    where
        M: Message,
        H: Handler<M> + 'static,
    {
        let name = handler_name::<H>();
        let key = BindingKey::new(M::kind(), routing_key);

        let mut state = self.state.lock().unwrap();
        if !state.bindings.is_message_registered(&key) {
            state.bindings.add_message_type(key.clone())?;
        }
        state.bindings.add_handler(&key, &name)?;
        state
            .handlers
            .entry((M::kind().to_string(), name.clone()))
            .or_insert_with(|| {
                Arc::new(TypedHandler::<M, H> {
                    name: name.clone(),
                    handler,
                    _marker: PhantomData,
                })
            });

        debug!("处理器已绑定: {} -> {} / {}", name, M::kind(), routing_key);
        Ok(())
    }

    /// 从所有绑定中移除处理器
    pub fn remove_handler(&self, handler: &str) {
        let mut state = self.state.lock().unwrap();
        state.bindings.remove_handler(handler);
        state.handlers.retain(|(_, name), _| name != handler);
    }

    /// 已绑定的全部处理器名
    pub fn all_handler_names(&self) -> Vec<String> {
        self.state.lock().unwrap().bindings.all_handlers()
    }

    /// 精确(类型, 路由键)对上的处理器快照
    pub fn for_message(&self, kind: &str, routing_key: &str) -> Vec<String> {
        self.state.lock().unwrap().bindings.for_message(kind, routing_key)
    }

    /// 调用所有命中的处理器
    ///
    /// 每个成功的处理器触发一次message_received钩子；失败的处理器
    /// 触发handler_failed钩子后继续处理其余处理器。本方法总是返回Ok，
    /// 消息的确认由调用方在返回后完成。
    pub async fn try_handle(&self, envelope: &MessageEnvelope) -> MessagingResult<()> {
        let invokers: Vec<Arc<dyn ErasedHandler>> = {
            let state = self.state.lock().unwrap();
            let mut found = Vec::new();
            for key in state.bindings.matching(&envelope.kinds, &envelope.routing_key) {
                if let Ok(names) = state.bindings.handlers(&key) {
                    for name in names {
                        let registry_key = (key.kind.clone(), name.clone());
                        if let Some(invoker) = state.handlers.get(&registry_key) {
                            found.push(Arc::clone(invoker));
                        }
                    }
                }
            }
            found
        };

        for invoker in invokers {
            match invoker.invoke(envelope).await {
                Ok(()) => self.hooks.notify_received(envelope),
                Err(e) => self.hooks.notify_handler_failed(envelope, invoker.name(), &e),
            }
        }
        Ok(())
    }
}
