use std::path::Path;

use log::{debug, info};
use sqlx::migrate::Migrator;
use sqlx::sqlite::*;
use sqlx::{Sqlite, SqlitePool, Transaction};

pub mod crud;
mod encoding;
pub mod model;
mod segment;

pub use encoding::EncodingStore;
pub use model::*;
pub use segment::SegmentStore;

use crate::error::Result;

pub type Database = SqlitePool;

static ENCODINGS_MIGRATOR: Migrator = sqlx::migrate!("./migrations/encodings");
static SEGMENT_MIGRATOR: Migrator = sqlx::migrate!("./migrations/segment");

/// 打开特征数据库，不存在时自动创建
pub async fn init_db(filename: impl AsRef<Path>, wal: bool) -> Result<Database> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let pool = connect(filename, wal).await?;

    info!("检查数据库迁移");
    ENCODINGS_MIGRATOR.run(&pool).await?;

    Ok(pool)
}

/// 打开分段数据库，不存在时自动创建
pub async fn init_segment_db(filename: impl AsRef<Path>) -> Result<Database> {
    let filename = filename.as_ref();
    debug!("打开分段数据库: {}", filename.display());

    if let Some(parent) = filename.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let pool = connect(filename, false).await?;
    SEGMENT_MIGRATOR.run(&pool).await?;

    Ok(pool)
}

async fn connect(filename: &Path, wal: bool) -> Result<Database> {
    let journal_mode = if wal { SqliteJournalMode::Wal } else { SqliteJournalMode::Delete };
    let options = SqliteConnectOptions::new()
        .journal_mode(journal_mode)
        .synchronous(SqliteSynchronous::Normal)
        .filename(filename)
        .create_if_missing(true);

    // 所有写入都在同一个事务里缓冲，只需要一个连接
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
    Ok(pool)
}

/// 延迟开启的写事务，`commit` 之前的写入对重新打开的数据库不可见
pub(crate) struct PendingTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl PendingTx {
    pub fn new() -> Self {
        Self { tx: None }
    }

    pub async fn get(&mut self, pool: &Database) -> Result<&mut SqliteConnection> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => pool.begin().await?,
        };
        Ok(&mut **self.tx.insert(tx))
    }

    pub async fn commit(&mut self) -> Result<bool> {
        match self.tx.take() {
            Some(tx) => {
                tx.commit().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
