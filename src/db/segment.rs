use std::path::Path;

use log::debug;

use super::{ClassStat, Database, PendingTx, crud, init_segment_db};
use crate::error::{Error, Result};
use crate::{ClassId, RecordId};

/// 单个分段的类别数据库：类别 ID => (代表记录, 成员数量)
///
/// 同一时间每个分段最多只有一个打开的实例。写入在 [`SegmentStore::flush`] 或
/// [`SegmentStore::close`] 时提交，未提交的写入在重新打开后不可见。
pub struct SegmentStore {
    label: String,
    pool: Database,
    tx: PendingTx,
    /// 下一个可分配的类别 ID，也就是当前的类别数量
    next_class: ClassId,
}

impl SegmentStore {
    pub async fn open(path: impl AsRef<Path>, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let pool = init_segment_db(path).await?;

        let (count, max) = crud::get_class_span(&pool).await?;
        if max.map_or(0, |m| m + 1) != count {
            return Err(Error::Invariant {
                segment: label,
                class_id: max.map(|m| m as ClassId),
                record_id: 0,
                reason: format!("类别 ID 不连续：共 {count} 个类别，最大 ID 为 {max:?}"),
            });
        }
        debug!("分段 {} 已有 {} 个类别", label, count);

        Ok(Self { label, pool, tx: PendingTx::new(), next_class: count as ClassId })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 当前类别数量
    pub fn class_count(&self) -> ClassId {
        self.next_class
    }

    /// 按成员数量降序列出类别 ID，数量相同时 ID 小的在前
    pub async fn list_classes_by_popularity(&mut self) -> Result<Vec<ClassId>> {
        Ok(self.classes().await?.into_iter().map(|c| c.class_id as ClassId).collect())
    }

    /// 与 [`SegmentStore::list_classes_by_popularity`] 顺序相同的完整类别信息
    pub async fn classes(&mut self) -> Result<Vec<ClassStat>> {
        let conn = self.tx.get(&self.pool).await?;
        Ok(crud::get_classes_by_popularity(conn).await?)
    }

    pub async fn representative_of(&mut self, class_id: ClassId) -> Result<RecordId> {
        Ok(self.get(class_id).await?.representative_id as RecordId)
    }

    pub async fn member_count(&mut self, class_id: ClassId) -> Result<u64> {
        Ok(self.get(class_id).await?.member_count as u64)
    }

    /// 查找以该记录为代表的类别
    pub async fn class_of_representative(&mut self, record_id: RecordId) -> Result<Option<ClassId>> {
        let conn = self.tx.get(&self.pool).await?;
        let class_id = crud::get_class_by_representative(conn, record_id as i64).await?;
        Ok(class_id.map(|c| c as ClassId))
    }

    /// 类别成员数量加一
    pub async fn increment(&mut self, class_id: ClassId) -> Result<()> {
        let conn = self.tx.get(&self.pool).await?;
        if crud::increase_class_count(conn, class_id as i64).await? == 0 {
            return Err(self.not_found(class_id));
        }
        Ok(())
    }

    /// 以该记录为代表新建类别，类别 ID 由分段按顺序分配
    pub async fn create(&mut self, first_record_id: RecordId) -> Result<ClassId> {
        let class_id = self.next_class;
        self.insert_class(class_id, first_record_id).await?;
        self.next_class += 1;
        self.add_member(first_record_id, class_id).await?;
        Ok(class_id)
    }

    /// 记录该记录最终归入的类别，每条记录只能写入一次
    ///
    /// 与成员计数在同一个事务中提交，特征数据库丢失未提交的类别时以此为准。
    pub async fn add_member(&mut self, record_id: RecordId, class_id: ClassId) -> Result<()> {
        let conn = self.tx.get(&self.pool).await?;
        match crud::add_member(conn, record_id as i64, class_id as i64).await {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::Invariant {
                segment: self.label.clone(),
                class_id: self.class_of_member(record_id).await?,
                record_id,
                reason: format!("记录已归入其他类别，不能再归入 {class_id}"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// 查找记录已归入的类别
    pub async fn class_of_member(&mut self, record_id: RecordId) -> Result<Option<ClassId>> {
        let conn = self.tx.get(&self.pool).await?;
        let class_id = crud::get_member_class(conn, record_id as i64).await?;
        Ok(class_id.map(|c| c as ClassId))
    }

    async fn insert_class(&mut self, class_id: ClassId, first_record_id: RecordId) -> Result<()> {
        let conn = self.tx.get(&self.pool).await?;
        match crud::add_class(conn, class_id as i64, first_record_id as i64).await {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // 主键冲突说明类别已存在；代表记录冲突说明该记录已是其他类别的代表
                match self.class_of_representative(first_record_id).await? {
                    Some(existing) if existing != class_id => Err(Error::Invariant {
                        segment: self.label.clone(),
                        class_id: Some(existing),
                        record_id: first_record_id,
                        reason: "记录已是其他类别的代表".to_string(),
                    }),
                    _ => Err(Error::ClassConflict { segment: self.label.clone(), class_id }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 提交缓冲的写入，保持连接
    pub async fn flush(&mut self) -> Result<()> {
        if self.tx.commit().await? {
            debug!("分段 {} 已提交", self.label);
        }
        Ok(())
    }

    /// 提交并关闭
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        self.pool.close().await;
        debug!("分段 {} 已关闭", self.label);
        Ok(())
    }

    async fn get(&mut self, class_id: ClassId) -> Result<ClassStat> {
        let conn = self.tx.get(&self.pool).await?;
        match crud::get_class(conn, class_id as i64).await? {
            Some(stat) => Ok(stat),
            None => Err(self.not_found(class_id)),
        }
    }

    fn not_found(&self, class_id: ClassId) -> Error {
        Error::ClassNotFound { segment: self.label.clone(), class_id }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn open(dir: &TempDir) -> SegmentStore {
        SegmentStore::open(dir.path().join("s1.db"), "s1").await.unwrap()
    }

    #[tokio::test]
    async fn class_ids_are_dense() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        assert_eq!(store.create(10).await.unwrap(), 0);
        assert_eq!(store.create(11).await.unwrap(), 1);
        assert_eq!(store.create(12).await.unwrap(), 2);
        assert_eq!(store.class_count(), 3);
        assert_eq!(store.representative_of(1).await.unwrap(), 11);
        assert_eq!(store.member_count(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn popularity_ties_break_by_class_id() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        for rep in [1, 2, 3, 4] {
            store.create(rep).await.unwrap();
        }
        store.increment(2).await.unwrap();
        store.increment(3).await.unwrap();
        store.increment(3).await.unwrap();

        for _ in 0..3 {
            assert_eq!(store.list_classes_by_popularity().await.unwrap(), vec![3, 2, 0, 1]);
        }
    }

    #[tokio::test]
    async fn increment_unknown_class() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        let err = store.increment(0).await.unwrap_err();
        assert!(matches!(err, Error::ClassNotFound { class_id: 0, .. }));
        assert!(matches!(store.representative_of(5).await, Err(Error::ClassNotFound { .. })));
    }

    #[tokio::test]
    async fn existing_class_id_conflicts() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        store.create(1).await.unwrap();
        let err = store.insert_class(0, 2).await.unwrap_err();
        assert!(matches!(err, Error::ClassConflict { class_id: 0, .. }));
    }

    #[tokio::test]
    async fn representative_reuse_is_invariant_violation() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        store.create(1).await.unwrap();
        let err = store.create(1).await.unwrap_err();
        assert!(err.is_fatal_invariant());
        assert_eq!(store.class_count(), 1);
    }

    #[tokio::test]
    async fn reopen_sees_only_flushed_writes() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        store.create(1).await.unwrap();
        store.increment(0).await.unwrap();
        store.flush().await.unwrap();
        store.create(2).await.unwrap();
        store.close().await.unwrap();

        let mut store = open(&dir).await;
        assert_eq!(store.class_count(), 2);
        assert_eq!(store.member_count(0).await.unwrap(), 2);
        store.create(3).await.unwrap();
        drop(store);

        let mut store = open(&dir).await;
        assert_eq!(store.class_count(), 2);
        assert_eq!(store.class_of_representative(2).await.unwrap(), Some(1));
        assert_eq!(store.class_of_representative(3).await.unwrap(), None);
        assert_eq!(store.class_of_member(2).await.unwrap(), Some(1));
        assert_eq!(store.class_of_member(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn members_are_written_once() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir).await;
        store.create(1).await.unwrap();
        store.increment(0).await.unwrap();
        store.add_member(2, 0).await.unwrap();
        assert_eq!(store.class_of_member(1).await.unwrap(), Some(0));
        assert_eq!(store.class_of_member(2).await.unwrap(), Some(0));

        let err = store.add_member(2, 0).await.unwrap_err();
        assert!(matches!(err, Error::Invariant { record_id: 2, class_id: Some(0), .. }));
    }
}
