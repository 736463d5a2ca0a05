//! 增量人脸聚类
//!
//! 每条记录只处理一次，不回看之前的记录：按成员数量从多到少依次与每个类别的代表记录比对，
//! 匹配则归入该类别，否则新建类别。不保证归入距离最近的类别。

use std::collections::HashMap;

use log::debug;

use crate::config::{ClusterOptions, ScanMode};
use crate::db::{EncodingStore, SegmentStore};
use crate::encoder::{Embedding, FaceComparator};
use crate::error::{Error, Result};
use crate::{ClassId, RecordId};

/// 单条记录的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 尚未提取特征
    Missing,
    /// 人脸数量不是 1，不参与聚类
    NotSingleFace(usize),
    /// 之前已经分类过
    AlreadyClassified(ClassId),
    /// 分段中已记录了类别，只补写了类别
    Recovered(ClassId),
    /// 归入已有类别，`matched` 为所有计数加一的类别
    Matched { class_id: ClassId, matched: Vec<ClassId> },
    /// 新建类别
    Created(ClassId),
}

impl Outcome {
    /// 记录最终所属的类别
    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            Self::AlreadyClassified(c) | Self::Recovered(c) | Self::Created(c) => Some(*c),
            Self::Matched { class_id, .. } => Some(*class_id),
            Self::Missing | Self::NotSingleFace(_) => None,
        }
    }
}

pub struct Classifier<C> {
    comparator: C,
    tolerance: f64,
    mode: ScanMode,
    /// 当前分段内各类别代表记录的特征，代表记录不会改变，可以放心缓存
    anchors: HashMap<ClassId, Embedding>,
}

impl<C: FaceComparator> Classifier<C> {
    pub fn new(comparator: C, options: &ClusterOptions) -> Self {
        Self {
            comparator,
            tolerance: options.tolerance,
            mode: options.scan_mode,
            anchors: HashMap::new(),
        }
    }

    /// 切换分段时必须调用
    pub fn reset(&mut self) {
        self.anchors.clear();
    }

    /// 对一条记录进行分类
    ///
    /// `segment` 必须是该记录所在分段的数据库。先写分段数据库，再写特征数据库。
    pub async fn classify(
        &mut self,
        id: RecordId,
        encodings: &mut EncodingStore,
        segment: &mut SegmentStore,
    ) -> Result<Outcome> {
        let Some(record) = encodings.get(id).await? else {
            return Ok(Outcome::Missing);
        };

        encodings.upsert_face_count(id, record.face_count).await?;
        if record.face_count != 1 {
            return Ok(Outcome::NotSingleFace(record.face_count));
        }

        if let Some(class_id) = record.class_id {
            return Ok(Outcome::AlreadyClassified(class_id));
        }

        // 分段已提交而特征数据库未提交：以分段数据库为准补写类别，不再计数
        if let Some(class_id) = segment.class_of_member(id).await? {
            encodings.set_class(id, class_id).await?;
            return Ok(Outcome::Recovered(class_id));
        }

        let embedding = &record.embeddings[0];
        let mut matched = vec![];
        for class_id in segment.list_classes_by_popularity().await? {
            let anchor = load_anchor(&mut self.anchors, class_id, encodings, segment).await?;
            if self.comparator.matches(anchor, embedding, self.tolerance) {
                matched.push(class_id);
                if self.mode == ScanMode::FirstMatch {
                    break;
                }
            }
        }

        let outcome = match matched.last().copied() {
            None => {
                let class_id = segment.create(id).await?;
                Outcome::Created(class_id)
            }
            Some(class_id) => {
                for &c in &matched {
                    segment.increment(c).await?;
                }
                segment.add_member(id, class_id).await?;
                Outcome::Matched { class_id, matched }
            }
        };

        if let Some(class_id) = outcome.class_id() {
            encodings.set_class(id, class_id).await?;
        }
        debug!("{} => {:?}", id, outcome);

        Ok(outcome)
    }
}

/// 读取类别代表记录的特征，代表记录必须恰好有一张人脸
async fn load_anchor<'a>(
    anchors: &'a mut HashMap<ClassId, Embedding>,
    class_id: ClassId,
    encodings: &mut EncodingStore,
    segment: &mut SegmentStore,
) -> Result<&'a Embedding> {
    if !anchors.contains_key(&class_id) {
        let representative = segment.representative_of(class_id).await?;
        let embedding = match encodings.get(representative).await? {
            Some(mut record) if record.face_count == 1 => record.embeddings.swap_remove(0),
            other => {
                return Err(Error::Invariant {
                    segment: segment.label().to_string(),
                    class_id: Some(class_id),
                    record_id: representative,
                    reason: match other {
                        Some(r) => format!("代表记录有 {} 张人脸", r.face_count),
                        None => "代表记录不在特征数据库中".to_string(),
                    },
                });
            }
        };
        anchors.insert(class_id, embedding);
    }
    Ok(&anchors[&class_id])
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::encoder::EuclideanComparator;

    struct Fixture {
        _dir: TempDir,
        encodings: EncodingStore,
        segment: SegmentStore,
    }

    async fn fixture(records: &[(RecordId, Vec<Embedding>)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut encodings = EncodingStore::open(dir.path().join("e.db"), true).await.unwrap();
        for (id, embeddings) in records {
            encodings.insert(*id, embeddings).await.unwrap();
        }
        let segment = SegmentStore::open(dir.path().join("s1.db"), "s1").await.unwrap();
        Fixture { _dir: dir, encodings, segment }
    }

    fn classifier(mode: ScanMode) -> Classifier<EuclideanComparator> {
        let options = ClusterOptions { scan_mode: mode, ..Default::default() };
        Classifier::new(EuclideanComparator, &options)
    }

    #[tokio::test]
    async fn first_and_third_share_a_class() {
        let mut f = fixture(&[
            (1, vec![vec![0.0, 0.0]]),
            (2, vec![vec![5.0, 5.0]]),
            (3, vec![vec![0.1, 0.0]]),
        ])
        .await;
        let mut c = classifier(ScanMode::FirstMatch);

        assert_eq!(c.classify(1, &mut f.encodings, &mut f.segment).await.unwrap(), Outcome::Created(0));
        assert_eq!(c.classify(2, &mut f.encodings, &mut f.segment).await.unwrap(), Outcome::Created(1));
        assert_eq!(
            c.classify(3, &mut f.encodings, &mut f.segment).await.unwrap(),
            Outcome::Matched { class_id: 0, matched: vec![0] }
        );

        assert_eq!(f.segment.representative_of(0).await.unwrap(), 1);
        assert_eq!(f.segment.member_count(0).await.unwrap(), 2);
        assert_eq!(f.segment.representative_of(1).await.unwrap(), 2);
        assert_eq!(f.segment.member_count(1).await.unwrap(), 1);
        assert_eq!(f.encodings.get(3).await.unwrap().unwrap().class_id, Some(0));
    }

    #[tokio::test]
    async fn non_single_face_records_stay_unclassified() {
        let mut f = fixture(&[(1, vec![]), (2, vec![vec![0.0], vec![1.0]])]).await;
        let mut c = classifier(ScanMode::FirstMatch);

        assert_eq!(c.classify(1, &mut f.encodings, &mut f.segment).await.unwrap(), Outcome::NotSingleFace(0));
        assert_eq!(c.classify(2, &mut f.encodings, &mut f.segment).await.unwrap(), Outcome::NotSingleFace(2));
        assert_eq!(c.classify(9, &mut f.encodings, &mut f.segment).await.unwrap(), Outcome::Missing);

        assert_eq!(f.encodings.get(2).await.unwrap().unwrap().class_id, None);
        assert_eq!(f.segment.class_count(), 0);
    }

    #[tokio::test]
    async fn replay_does_not_double_count() {
        let mut f = fixture(&[(1, vec![vec![0.0]]), (2, vec![vec![0.1]]), (3, vec![vec![3.0]])]).await;
        let mut c = classifier(ScanMode::FirstMatch);

        for _ in 0..2 {
            for id in 1..=3 {
                c.classify(id, &mut f.encodings, &mut f.segment).await.unwrap();
            }
        }

        let classes = f.segment.classes().await.unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!((classes[0].representative_id, classes[0].member_count), (1, 2));
        assert_eq!((classes[1].representative_id, classes[1].member_count), (3, 1));
        assert_eq!(f.encodings.get(2).await.unwrap().unwrap().class_id, Some(0));
    }

    #[tokio::test]
    async fn most_popular_class_is_tried_first() {
        // 4 与两个类别都匹配，类别 1 成员更多，先被尝试
        let mut f = fixture(&[
            (1, vec![vec![0.0]]),
            (2, vec![vec![1.0]]),
            (3, vec![vec![1.1]]),
            (4, vec![vec![0.5]]),
        ])
        .await;
        let mut c = classifier(ScanMode::FirstMatch);
        for id in 1..=3 {
            c.classify(id, &mut f.encodings, &mut f.segment).await.unwrap();
        }

        assert_eq!(
            c.classify(4, &mut f.encodings, &mut f.segment).await.unwrap(),
            Outcome::Matched { class_id: 1, matched: vec![1] }
        );
        assert_eq!(f.segment.member_count(0).await.unwrap(), 1);
        assert_eq!(f.segment.member_count(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn all_matches_mode_counts_every_match() {
        let mut f = fixture(&[(1, vec![vec![0.0]]), (2, vec![vec![1.0]]), (3, vec![vec![0.5]])]).await;
        let mut c = classifier(ScanMode::AllMatches);
        c.classify(1, &mut f.encodings, &mut f.segment).await.unwrap();
        c.classify(2, &mut f.encodings, &mut f.segment).await.unwrap();

        // 两个类别成员数相同，按 ID 顺序扫描，记录归入最后一个匹配的类别
        assert_eq!(
            c.classify(3, &mut f.encodings, &mut f.segment).await.unwrap(),
            Outcome::Matched { class_id: 1, matched: vec![0, 1] }
        );
        assert_eq!(f.segment.member_count(0).await.unwrap(), 2);
        assert_eq!(f.segment.member_count(1).await.unwrap(), 2);
        assert_eq!(f.encodings.get(3).await.unwrap().unwrap().class_id, Some(1));
    }

    #[tokio::test]
    async fn representative_without_class_is_recovered() {
        let mut f = fixture(&[(1, vec![vec![0.0]])]).await;
        // 模拟分段已提交但特征数据库未提交
        f.segment.create(1).await.unwrap();

        let mut c = classifier(ScanMode::FirstMatch);
        assert_eq!(c.classify(1, &mut f.encodings, &mut f.segment).await.unwrap(), Outcome::Recovered(0));
        assert_eq!(f.segment.class_count(), 1);
        assert_eq!(f.segment.member_count(0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn matched_record_lost_by_encodings_is_not_counted_twice() {
        let dir = TempDir::new().unwrap();
        let (e_path, s_path) = (dir.path().join("e.db"), dir.path().join("s1.db"));
        let mut encodings = EncodingStore::open(&e_path, true).await.unwrap();
        encodings.insert(1, &[vec![0.0]]).await.unwrap();
        encodings.insert(2, &[vec![0.1]]).await.unwrap();
        encodings.commit().await.unwrap();

        let mut c = classifier(ScanMode::FirstMatch);
        let mut segment = SegmentStore::open(&s_path, "s1").await.unwrap();
        assert_eq!(c.classify(1, &mut encodings, &mut segment).await.unwrap(), Outcome::Created(0));
        assert_eq!(
            c.classify(2, &mut encodings, &mut segment).await.unwrap(),
            Outcome::Matched { class_id: 0, matched: vec![0] }
        );
        // 分段已提交，特征数据库的类别未提交就退出
        segment.close().await.unwrap();
        drop(encodings);

        let mut encodings = EncodingStore::open(&e_path, true).await.unwrap();
        let mut segment = SegmentStore::open(&s_path, "s1").await.unwrap();
        assert_eq!(encodings.get(2).await.unwrap().unwrap().class_id, None);

        let mut c = classifier(ScanMode::FirstMatch);
        assert_eq!(c.classify(1, &mut encodings, &mut segment).await.unwrap(), Outcome::Recovered(0));
        assert_eq!(c.classify(2, &mut encodings, &mut segment).await.unwrap(), Outcome::Recovered(0));
        assert_eq!(segment.member_count(0).await.unwrap(), 2);
        assert_eq!(encodings.get(2).await.unwrap().unwrap().class_id, Some(0));
    }

    #[tokio::test]
    async fn missing_representative_is_fatal() {
        let mut f = fixture(&[(2, vec![vec![0.0]])]).await;
        f.segment.create(1).await.unwrap();

        let mut c = classifier(ScanMode::FirstMatch);
        let err = c.classify(2, &mut f.encodings, &mut f.segment).await.unwrap_err();
        assert!(matches!(err, Error::Invariant { record_id: 1, class_id: Some(0), .. }));
    }
}
