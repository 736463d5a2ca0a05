use std::path::PathBuf;

use indicatif::ProgressBar;
use log::info;
use serde::Serialize;

use super::write_image;
use crate::encoder::{Embedding, FaceComparator};
use crate::error::{Error, Result};
use crate::orchestrator::ChunkHandler;
use crate::stream::Record;
use crate::{FaceDB, RecordId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimilarStats {
    /// 参与比对的单人脸记录
    pub compared: usize,
    pub matched: usize,
}

/// 在全部记录中查找与目标记录相似的人脸
pub struct SimilarTask<C> {
    db: FaceDB,
    comparator: C,
    tolerance: f64,
    target_id: RecordId,
    target: Embedding,
    output: PathBuf,
    stats: SimilarStats,
}

impl<C: FaceComparator> SimilarTask<C> {
    /// 目标记录必须恰好有一张人脸
    pub async fn new(
        mut db: FaceDB,
        comparator: C,
        target_id: RecordId,
        tolerance: f64,
        output: impl Into<PathBuf>,
    ) -> Result<Self> {
        let target = match db.encodings().get(target_id).await? {
            Some(mut record) if record.face_count == 1 => record.embeddings.swap_remove(0),
            Some(record) => return Err(Error::BadTarget { record_id: target_id, faces: record.face_count }),
            None => return Err(Error::BadTarget { record_id: target_id, faces: 0 }),
        };
        Ok(Self {
            db,
            comparator,
            tolerance,
            target_id,
            target,
            output: output.into(),
            stats: SimilarStats::default(),
        })
    }

    pub fn stats(&self) -> &SimilarStats {
        &self.stats
    }

    pub fn into_db(self) -> FaceDB {
        self.db
    }
}

impl<C: FaceComparator> ChunkHandler for SimilarTask<C> {
    async fn process(&mut self, records: &[&Record], pb: &ProgressBar) -> Result<()> {
        for &record in records {
            pb.inc(1);
            let Some(encoding) = self.db.encodings().get(record.id).await? else {
                continue;
            };
            if encoding.face_count != 1 {
                continue;
            }

            self.stats.compared += 1;
            if self.comparator.matches(&self.target, &encoding.embeddings[0], self.tolerance) {
                let path = self.output.join(format!("{}.jpg", record.id));
                write_image(&path, record)?;
                self.stats.matched += 1;
                info!("{} 与 {} 相似", record.id, self.target_id);
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
