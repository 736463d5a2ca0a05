use indicatif::ProgressBar;
use log::debug;
use serde::Serialize;

use super::ExportLayout;
use crate::FaceDB;
use crate::error::Result;
use crate::orchestrator::{ChunkHandler, SegmentSlot};
use crate::stream::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub exported: usize,
    /// 没有类别的记录
    pub unclassified: usize,
    /// 所属类别成员过少
    pub too_few_members: usize,
}

/// 按 分段/类别 导出成员数量足够多的类别
pub struct ExportTask {
    db: FaceDB,
    segments: SegmentSlot,
    layout: ExportLayout,
    min_members: u64,
    stats: ExportStats,
}

impl ExportTask {
    pub fn new(db: FaceDB, layout: ExportLayout, min_members: u64) -> Self {
        let segments = SegmentSlot::new(db.conf_dir().clone());
        Self { db, segments, layout, min_members, stats: ExportStats::default() }
    }

    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    pub fn into_db(self) -> FaceDB {
        self.db
    }
}

impl ChunkHandler for ExportTask {
    async fn process(&mut self, records: &[&Record], pb: &ProgressBar) -> Result<()> {
        for &record in records {
            pb.inc(1);
            let class_id = match self.db.encodings().get(record.id).await? {
                Some(encoding) => encoding.class_id,
                None => None,
            };
            let Some(class_id) = class_id else {
                self.stats.unclassified += 1;
                continue;
            };

            let (segment, _) = self.segments.switch_to(&record.segment).await?;
            if segment.member_count(class_id).await? < self.min_members {
                self.stats.too_few_members += 1;
                continue;
            }

            let path = self.layout.dump(record, class_id)?;
            debug!("导出 {}", path.display());
            self.stats.exported += 1;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        // 只读，结束事务以释放快照
        self.segments.flush().await?;
        self.db.encodings().commit().await
    }

    async fn finish(&mut self) -> Result<()> {
        self.segments.close().await?;
        self.db.encodings().commit().await
    }
}
