use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 最小退避时长（毫秒）
pub const MIN_SLEEP_MS: u64 = 10;
/// 最大退避时长（毫秒）
pub const MAX_SLEEP_MS: u64 = 800;

/// 共享的轮询退避状态
///
/// 每次失败的发送或空轮询调用`sleep_more`，休眠时长逐次加倍并有上界；
/// 任何一次成功操作调用`reset`立即归零。单字段原子运算，
/// 轻度竞争下保持单调。
#[derive(Debug)]
pub struct Sleeper {
    current_ms: AtomicU64,
}

impl Sleeper {
    pub fn new() -> Self {
        Self {
            current_ms: AtomicU64::new(MIN_SLEEP_MS),
        }
    }

    /// 按当前退避时长休眠一次，并增加下一次的时长
    pub async fn sleep_more(&self) {
        let ms = self.current_ms.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let next = ms.saturating_mul(2).min(MAX_SLEEP_MS);
        self.current_ms.store(next, Ordering::Relaxed);
    }

    /// 立即返回，并把退避时长重置到最小值
    pub fn reset(&self) {
        self.current_ms.store(MIN_SLEEP_MS, Ordering::Relaxed);
    }

    /// 下一次`sleep_more`将使用的时长（毫秒）
    pub fn current_delay_ms(&self) -> u64 {
        self.current_ms.load(Ordering::Relaxed)
    }
}

impl Default for Sleeper {
    fn default() -> Self {
        Self::new()
    }
}
