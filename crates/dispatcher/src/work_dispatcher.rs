use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use messaging_domain::{WorkItem, WorkQueue};
use messaging_errors::{MessagingError, MessagingResult};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// 默认的每节点并发处理数
pub const DEFAULT_CONCURRENT_HANDLERS: usize = 4;

/// 注册到分发器上的消费函数，每个成功出队的工作项调用一次
pub type Consumer<T> = Arc<dyn Fn(T) -> BoxFuture<'static, MessagingResult<()>> + Send + Sync>;

/// 分发过程中上报的失败
pub enum DispatchFailure<T> {
    /// 拉取阶段失败，没有关联的工作项
    Pull(MessagingError),
    /// 消费阶段失败，携带工作项以便取消或重投
    Consume(WorkItem<T>, MessagingError),
}

/// 失败上报回调
pub type ExceptionHandler<T> =
    Arc<dyn Fn(DispatchFailure<T>) -> BoxFuture<'static, ()> + Send + Sync>;

struct DispatcherCore<T: Clone + Send + Sync + 'static> {
    queue: Arc<dyn WorkQueue<T>>,
    consumer: RwLock<Option<Consumer<T>>>,
    exception_handler: RwLock<Option<ExceptionHandler<T>>>,
    max_inflight: AtomicUsize,
    inflight: Arc<AtomicUsize>,
    running: AtomicBool,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

/// 有界并发的通用工作分发器
///
/// 从队列抽象中拉取工作项，交给注册的消费函数执行，同时在处理的
/// 工作项数不超过上限。发送与接收路径使用同一个实现：发送端用
/// 上限1保证发布顺序，接收端用可配置的处理器并发数。
///
/// 单个工作项的失败通过回调上报，分发器本身从不因此中断。
pub struct WorkDispatcher<T: Clone + Send + Sync + 'static> {
    core: Arc<DispatcherCore<T>>,
}

impl<T: Clone + Send + Sync + 'static> WorkDispatcher<T> {
    pub fn new(queue: Arc<dyn WorkQueue<T>>) -> Self {
        Self {
            core: Arc::new(DispatcherCore {
                queue,
                consumer: RwLock::new(None),
                exception_handler: RwLock::new(None),
                max_inflight: AtomicUsize::new(DEFAULT_CONCURRENT_HANDLERS),
                inflight: Arc::new(AtomicUsize::new(0)),
                running: AtomicBool::new(false),
                shutdown_tx: Mutex::new(None),
            }),
        }
    }

    /// 注册消费函数。本系统每个分发器实例只使用一个消费者。
    pub fn add_consumer(&self, consumer: Consumer<T>) {
        *self.core.consumer.write().unwrap() = Some(consumer);
    }

    /// 注册失败上报回调
    pub fn set_exception_handler(&self, handler: ExceptionHandler<T>) {
        *self.core.exception_handler.write().unwrap() = Some(handler);
    }

    /// 设置并发处理上限。运行时可调整，对后续启动的工作生效，
    /// 不会强行取消已在处理的工作项。上限1保证严格的顺序处理。
    pub fn set_maximum_inflight(&self, max: usize) {
        self.core.max_inflight.store(max.max(1), Ordering::SeqCst);
    }

    pub fn maximum_inflight(&self) -> usize {
        self.core.max_inflight.load(Ordering::SeqCst)
    }

    /// 当前在处理的工作项数
    pub fn inflight_count(&self) -> usize {
        self.core.inflight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// 启动后台拉取循环，重复调用是空操作
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *self.core.shutdown_tx.lock().unwrap() = Some(tx);

        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            debug!("分发器拉取循环启动");
            // 关闭信号在两次拉取之间检查，绝不在拉取中途
            // 打断一次broker请求，避免丢失未确认的投递
            loop {
                match rx.try_recv() {
                    Err(broadcast::error::TryRecvError::Empty) => core.pump_once().await,
                    _ => break,
                }
            }
            debug!("分发器拉取循环退出");
        });
    }

    /// 停止拉取新工作项，不等待在处理的工作完成
    pub fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.core.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// 阻塞式排空：停止接收新拉取，最多等待`timeout`让排队与在处理的
    /// 工作完成，然后停止。发送端关闭时使用，保证出站消息不被悄悄丢弃。
    pub async fn wait_for_empty_queue_and_stop(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let queued = self.core.queue.length().await;
            let inflight = self.inflight_count();
            if queued == 0 && inflight == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "等待队列清空超时，剩余 {} 项排队、{} 项在处理",
                    queued, inflight
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.stop();
    }
}

impl<T: Clone + Send + Sync + 'static> DispatcherCore<T> {
    async fn pump_once(&self) {
        if self.inflight.load(Ordering::SeqCst) >= self.max_inflight.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
            return;
        }

        let consumer = self.consumer.read().unwrap().clone();
        let consumer = match consumer {
            Some(consumer) => consumer,
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                return;
            }
        };

        match self.queue.try_dequeue().await {
            Ok(Some(item)) => {
                self.inflight.fetch_add(1, Ordering::SeqCst);
                let inflight = Arc::clone(&self.inflight);
                let exception_handler = self.exception_handler.read().unwrap().clone();

                tokio::spawn(async move {
                    match consumer(item.item.clone()).await {
                        Ok(()) => {
                            if let Err(e) = item.finish().await {
                                warn!("确认工作项失败: {}", e);
                            }
                        }
                        Err(e) => match exception_handler {
                            Some(handler) => handler(DispatchFailure::Consume(item, e)).await,
                            None => {
                                warn!("消费工作项失败: {}", e);
                                if let Err(cancel_err) = item.cancel().await {
                                    warn!("取消工作项失败: {}", cancel_err);
                                }
                            }
                        },
                    }
                    inflight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Ok(None) => {
                // 空队列的限速由队列实现负责
                tokio::task::yield_now().await;
            }
            Err(e) => {
                let exception_handler = self.exception_handler.read().unwrap().clone();
                match exception_handler {
                    Some(handler) => handler(DispatchFailure::Pull(e)).await,
                    None => error!("拉取工作项失败: {}", e),
                }
            }
        }
    }
}
