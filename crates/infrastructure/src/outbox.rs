use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use messaging_dispatcher::Sleeper;
use messaging_domain::{Completion, WorkItem, WorkQueue};
use messaging_errors::{MessagingError, MessagingResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// 出站持久队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// 持久化存储文件路径，":memory:"表示仅内存
    pub storage_path: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            storage_path: "messaging-outbox.db".to_string(),
        }
    }
}

/// 出站消息的持久FIFO存储
///
/// 发送方入队即返回，消息只在发送确认成功后删除，
/// 未送达的记录跨进程重启保留。
pub struct SqliteOutbox {
    pool: SqlitePool,
}

impl SqliteOutbox {
    /// 打开（或创建）存储文件，并把上次进程遗留的在途标记复位
    pub async fn open(storage_path: &str) -> MessagingResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{storage_path}"))
            .map_err(|e| MessagingError::Storage(format!("无效的存储路径 {storage_path}: {e}")))?
            .create_if_missing(true);

        // 单连接保证声明顺序与FIFO读取一致，连接常驻避免内存库被回收
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| MessagingError::Storage(format!("打开出站存储失败: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outgoing_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload BLOB NOT NULL,
                claimed INTEGER NOT NULL DEFAULT 0,
                enqueued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| MessagingError::Storage(format!("初始化出站存储失败: {e}")))?;

        // 崩溃恢复：上次未确认的在途记录重新可见
        let recovered = sqlx::query("UPDATE outgoing_messages SET claimed = 0 WHERE claimed = 1")
            .execute(&pool)
            .await
            .map_err(|e| MessagingError::Storage(format!("恢复在途记录失败: {e}")))?;

        if recovered.rows_affected() > 0 {
            info!("恢复 {} 条未送达的出站记录", recovered.rows_affected());
        }

        Ok(Self { pool })
    }

    /// 仅内存存储，用于回环模式和测试
    pub async fn open_in_memory() -> MessagingResult<Self> {
        Self::open(":memory:").await
    }

    /// 追加一条记录，写入成功即返回，绝不等待broker
    pub async fn enqueue(&self, payload: &[u8]) -> MessagingResult<i64> {
        let result = sqlx::query(
            "INSERT INTO outgoing_messages (payload, claimed, enqueued_at) VALUES (?, 0, ?)",
        )
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::Storage(format!("写入出站记录失败: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    /// 取出最早的未认领记录并标记在途
    pub async fn claim_oldest(&self) -> MessagingResult<Option<(i64, Vec<u8>)>> {
        let row = sqlx::query(
            "SELECT id, payload FROM outgoing_messages WHERE claimed = 0 ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MessagingError::Storage(format!("读取出站记录失败: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get(0);
        let payload: Vec<u8> = row.get(1);

        sqlx::query("UPDATE outgoing_messages SET claimed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::Storage(format!("标记出站记录失败: {e}")))?;

        Ok(Some((id, payload)))
    }

    /// 发送确认成功后删除记录
    pub async fn finish(&self, id: i64) -> MessagingResult<()> {
        sqlx::query("DELETE FROM outgoing_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::Storage(format!("删除出站记录失败: {e}")))?;
        Ok(())
    }

    /// 发送失败后解除在途标记，记录按原顺序重试
    pub async fn release(&self, id: i64) -> MessagingResult<()> {
        sqlx::query("UPDATE outgoing_messages SET claimed = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::Storage(format!("释放出站记录失败: {e}")))?;
        Ok(())
    }

    /// 存储中的记录总数，含在途
    pub async fn pending_count(&self) -> MessagingResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM outgoing_messages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::Storage(format!("统计出站记录失败: {e}")))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    /// 释放存储句柄，未送达的记录保留在文件中
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("出站存储已关闭");
    }
}

struct OutboxCompletion {
    outbox: Arc<SqliteOutbox>,
    id: i64,
}

#[async_trait]
impl Completion for OutboxCompletion {
    async fn finish(&self) -> MessagingResult<()> {
        self.outbox.finish(self.id).await
    }

    async fn cancel(&self) -> MessagingResult<()> {
        self.outbox.release(self.id).await
    }
}

/// 把出站存储适配成分发器的队列抽象
///
/// 出队严格按入队顺序；空队列时通过共享Sleeper限速。
pub struct PersistentWorkQueue {
    outbox: Arc<SqliteOutbox>,
    sleeper: Arc<Sleeper>,
}

impl PersistentWorkQueue {
    pub fn new(outbox: Arc<SqliteOutbox>, sleeper: Arc<Sleeper>) -> Self {
        Self { outbox, sleeper }
    }

    pub async fn enqueue(&self, payload: &[u8]) -> MessagingResult<i64> {
        self.outbox.enqueue(payload).await
    }
}

#[async_trait]
impl WorkQueue<Vec<u8>> for PersistentWorkQueue {
    async fn try_dequeue(&self) -> MessagingResult<Option<WorkItem<Vec<u8>>>> {
        match self.outbox.claim_oldest().await? {
            Some((id, payload)) => Ok(Some(WorkItem::new(
                payload,
                Arc::new(OutboxCompletion {
                    outbox: Arc::clone(&self.outbox),
                    id,
                }),
            ))),
            None => {
                self.sleeper.sleep_more().await;
                Ok(None)
            }
        }
    }

    async fn length(&self) -> usize {
        match self.outbox.pending_count().await {
            Ok(count) => count as usize,
            Err(e) => {
                warn!("读取出站队列长度失败: {}", e);
                0
            }
        }
    }
}
