use std::fmt;

use uuid::Uuid;

/// 监听器端点名称的固定后缀
pub const LISTENER_SUFFIX: &str = "_messaging_listener";
/// 集成测试模式下生成的端点名前缀
pub const TEST_LISTENER_PREFIX: &str = "test_listener_";
/// 集成环境端点名中携带的标记
pub const INTEGRATION_MARKER: &str = ".integration.";

/// 消息目的地端点
///
/// 命名端点由多个监听器共享并竞争消费；唯一端点按监听器生成，从不共享。
/// 端点标识在节点生命周期内保持不变。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// 唯一端点生成器
///
/// 生成的名称携带机器名、进程号和随机片段，保证每个监听器独占一个队列。
#[derive(Debug, Clone, Default)]
pub struct UniqueEndpointGenerator {
    integration_test_mode: bool,
}

impl UniqueEndpointGenerator {
    pub fn new() -> Self {
        Self {
            integration_test_mode: false,
        }
    }

    /// 集成测试模式：生成的名称使用测试前缀，便于关闭时统一清理
    pub fn integration_test_mode() -> Self {
        Self {
            integration_test_mode: true,
        }
    }

    pub fn generate(&self) -> Endpoint {
        let host = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        let pid = std::process::id();
        let tag = &Uuid::new_v4().simple().to_string()[..8];

        let name = if self.integration_test_mode {
            format!("{TEST_LISTENER_PREFIX}{host}_{pid}_{tag}")
        } else {
            format!("{host}_{pid}_{tag}{LISTENER_SUFFIX}")
        };
        Endpoint::new(name.to_lowercase())
    }
}
