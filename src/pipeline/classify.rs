use indicatif::ProgressBar;
use log::{debug, error};
use serde::Serialize;

use super::ExportLayout;
use crate::FaceDB;
use crate::classifier::{Classifier, Outcome};
use crate::encoder::FaceComparator;
use crate::error::Result;
use crate::orchestrator::{ChunkHandler, SegmentSlot};
use crate::stream::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifyStats {
    /// 没有特征的记录
    pub missing: usize,
    /// 人脸数量不是 1 的记录
    pub not_single_face: usize,
    pub already_classified: usize,
    pub recovered: usize,
    pub matched: usize,
    pub created: usize,
    /// 打开分段数据库的次数
    pub segments_opened: usize,
}

impl ClassifyStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Missing => self.missing += 1,
            Outcome::NotSingleFace(_) => self.not_single_face += 1,
            Outcome::AlreadyClassified(_) => self.already_classified += 1,
            Outcome::Recovered(_) => self.recovered += 1,
            Outcome::Matched { .. } => self.matched += 1,
            Outcome::Created(_) => self.created += 1,
        }
    }
}

/// 按分段逐条聚类
pub struct ClassifyTask<C> {
    db: FaceDB,
    segments: SegmentSlot,
    classifier: Classifier<C>,
    dump: Option<ExportLayout>,
    stats: ClassifyStats,
}

impl<C: FaceComparator> ClassifyTask<C> {
    pub fn new(db: FaceDB, classifier: Classifier<C>) -> Self {
        let segments = SegmentSlot::new(db.conf_dir().clone());
        Self { db, segments, classifier, dump: None, stats: ClassifyStats::default() }
    }

    /// 分类的同时导出图片
    pub fn dump_to(mut self, layout: ExportLayout) -> Self {
        self.dump = Some(layout);
        self
    }

    pub fn stats(&self) -> ClassifyStats {
        ClassifyStats { segments_opened: self.segments.opened(), ..self.stats.clone() }
    }

    pub fn active_segment(&self) -> Option<&str> {
        self.segments.active()
    }

    pub fn into_db(self) -> FaceDB {
        self.db
    }

    async fn classify_one(&mut self, record: &Record) -> Result<Outcome> {
        let (segment, switched) = self.segments.switch_to(&record.segment).await?;
        if switched {
            self.classifier.reset();
        }
        self.classifier.classify(record.id, self.db.encodings(), segment).await
    }
}

impl<C: FaceComparator> ChunkHandler for ClassifyTask<C> {
    async fn process(&mut self, records: &[&Record], pb: &ProgressBar) -> Result<()> {
        for record in records {
            let outcome = match self.classify_one(record).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("记录 {} (分段 {}) 分类失败", record.id, record.segment);
                    return Err(e);
                }
            };
            debug!("{} [{}] => {:?}", record.id, record.segment, outcome);
            self.stats.record(&outcome);

            if let (Some(layout), Some(class_id)) = (&self.dump, outcome.class_id()) {
                layout.dump(record, class_id)?;
            }

            pb.set_message(format!("{}/{}", record.segment, record.id));
            pb.inc(1);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        // 先提交分段，再提交特征数据库
        self.segments.flush().await?;
        self.db.encodings().commit().await
    }

    async fn finish(&mut self) -> Result<()> {
        self.segments.close().await?;
        self.db.encodings().commit().await
    }
}
