use std::sync::Arc;

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::warn;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tokio::task::spawn_blocking;

use crate::FaceDB;
use crate::encoder::{Embedding, FaceEncoder};
use crate::error::{Error, Result};
use crate::orchestrator::ChunkHandler;
use crate::stream::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    /// 新写入的记录
    pub extracted: usize,
    /// 已在数据库中的记录
    pub existing: usize,
    /// 提取失败的记录
    pub failed: usize,
    /// 新写入记录中的人脸总数
    pub faces: usize,
}

/// 提取人脸特征并写入特征数据库
///
/// 同一批次内的记录在线程池中并行提取，写入按原顺序进行。
pub struct ExtractTask {
    db: FaceDB,
    encoder: Arc<dyn FaceEncoder>,
    pool: Arc<ThreadPool>,
    stats: ExtractStats,
}

impl ExtractTask {
    pub fn new(db: FaceDB, encoder: Arc<dyn FaceEncoder>, jobs: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("extract-{i}"))
            .build()
            .map_err(|e| Error::Encoder(e.to_string()))?;
        Ok(Self { db, encoder, pool: Arc::new(pool), stats: ExtractStats::default() })
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    pub fn into_db(self) -> FaceDB {
        self.db
    }
}

impl ChunkHandler for ExtractTask {
    async fn process(&mut self, records: &[&Record], pb: &ProgressBar) -> Result<()> {
        let mut pending = Vec::with_capacity(records.len());
        for &record in records {
            if self.db.encodings().contains(record.id).await? {
                self.stats.existing += 1;
                pb.inc(1);
            } else {
                pending.push(record.clone());
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let encoder = self.encoder.clone();
        let pool = self.pool.clone();
        let pb = pb.clone();
        let results: Vec<(Record, Result<Vec<Embedding>>)> = spawn_blocking(move || {
            pool.install(|| {
                pending
                    .into_par_iter()
                    .progress_with(pb)
                    .map(|record| {
                        let result = record.image().and_then(|image| encoder.encode(&image));
                        (record, result)
                    })
                    .collect()
            })
        })
        .await
        .map_err(|e| Error::Encoder(format!("提取线程异常: {e}")))?;

        for (record, result) in results {
            match result {
                Ok(embeddings) => {
                    self.db.encodings().insert(record.id, &embeddings).await?;
                    self.stats.extracted += 1;
                    self.stats.faces += embeddings.len();
                }
                Err(e) => {
                    warn!("记录 {} (分段 {}) 提取失败: {}", record.id, record.segment, e);
                    self.stats.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.db.encodings().commit().await
    }

    async fn finish(&mut self) -> Result<()> {
        self.db.encodings().commit().await
    }
}
