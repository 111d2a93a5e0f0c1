use tracing_subscriber::EnvFilter;

/// 初始化日志输出
///
/// 优先读取`RUST_LOG`环境变量，未设置时使用给定的默认过滤器。
/// 已经初始化过时静默返回，便于在测试里重复调用。
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
