use std::path::Path;

use log::debug;

use super::{Database, EncodingRecord, EncodingStats, PendingTx, crud, init_db};
use crate::encoder::Embedding;
use crate::error::{Error, Result};
use crate::{ClassId, RecordId};

/// 全局特征数据库：记录 ID => (特征, 人脸数量, 类别)
///
/// 所有读写都经过同一个事务，只有调用 [`EncodingStore::commit`] 之后才会落盘。
pub struct EncodingStore {
    pool: Database,
    tx: PendingTx,
}

impl EncodingStore {
    pub async fn open(path: impl AsRef<Path>, wal: bool) -> Result<Self> {
        let pool = init_db(path, wal).await?;
        Ok(Self { pool, tx: PendingTx::new() })
    }

    /// 获取特征记录，`None` 表示该记录尚未提取特征
    pub async fn get(&mut self, id: RecordId) -> Result<Option<EncodingRecord>> {
        let conn = self.tx.get(&self.pool).await?;
        crud::get_encoding(conn, id as i64).await?.map(EncodingRecord::try_from).transpose()
    }

    pub async fn contains(&mut self, id: RecordId) -> Result<bool> {
        let conn = self.tx.get(&self.pool).await?;
        Ok(crud::has_encoding(conn, id as i64).await?)
    }

    /// 写入提取结果，已存在的记录保持不变，返回是否新增
    pub async fn insert(&mut self, id: RecordId, embeddings: &[Embedding]) -> Result<bool> {
        let blob = bincode::serialize(embeddings)?;
        let conn = self.tx.get(&self.pool).await?;
        Ok(crud::add_encoding(conn, id as i64, &blob, embeddings.len() as i64).await?)
    }

    /// 更新人脸数量，可重复调用
    pub async fn upsert_face_count(&mut self, id: RecordId, count: usize) -> Result<()> {
        let conn = self.tx.get(&self.pool).await?;
        crud::set_face_count(conn, id as i64, count as i64).await?;
        Ok(())
    }

    /// 设置记录所属类别
    ///
    /// 重复设置为同一类别不做任何事，不支持改为其他类别。
    pub async fn set_class(&mut self, id: RecordId, class_id: ClassId) -> Result<()> {
        let conn = self.tx.get(&self.pool).await?;
        let current = crud::get_encoding(&mut *conn, id as i64).await?.and_then(|row| row.class_id);
        match current {
            Some(current) if current == class_id as i64 => Ok(()),
            Some(current) => Err(Error::Reassignment {
                record_id: id,
                current: current as ClassId,
                requested: class_id,
            }),
            None => {
                crud::set_class(conn, id as i64, class_id as i64).await?;
                Ok(())
            }
        }
    }

    pub async fn stats(&mut self) -> Result<EncodingStats> {
        let conn = self.tx.get(&self.pool).await?;
        Ok(crud::get_encoding_stats(conn).await?)
    }

    /// 提交缓冲的写入
    pub async fn commit(&mut self) -> Result<()> {
        if self.tx.commit().await? {
            debug!("特征数据库已提交");
        }
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.commit().await?;
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn absent_record_is_none() {
        let dir = TempDir::new().unwrap();
        let mut store = EncodingStore::open(dir.path().join("e.db"), true).await.unwrap();
        assert!(store.get(7).await.unwrap().is_none());
        assert!(!store.contains(7).await.unwrap());
    }

    #[tokio::test]
    async fn insert_then_get() {
        let dir = TempDir::new().unwrap();
        let mut store = EncodingStore::open(dir.path().join("e.db"), true).await.unwrap();
        assert!(store.insert(3, &[vec![0.1, 0.2], vec![0.3, 0.4]]).await.unwrap());
        assert!(!store.insert(3, &[]).await.unwrap());

        let record = store.get(3).await.unwrap().unwrap();
        assert_eq!(record.face_count, 2);
        assert_eq!(record.embeddings[1], vec![0.3, 0.4]);
        assert_eq!(record.class_id, None);
    }

    #[tokio::test]
    async fn set_class_is_idempotent_but_not_reassignable() {
        let dir = TempDir::new().unwrap();
        let mut store = EncodingStore::open(dir.path().join("e.db"), true).await.unwrap();
        store.insert(1, &[vec![0.0]]).await.unwrap();
        store.set_class(1, 4).await.unwrap();
        store.set_class(1, 4).await.unwrap();
        let err = store.set_class(1, 5).await.unwrap_err();
        assert!(matches!(err, Error::Reassignment { current: 4, requested: 5, .. }));
    }

    #[tokio::test]
    async fn only_committed_writes_survive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.db");

        let mut store = EncodingStore::open(&path, true).await.unwrap();
        store.insert(1, &[vec![1.0]]).await.unwrap();
        store.commit().await.unwrap();
        store.insert(2, &[vec![2.0]]).await.unwrap();
        // 未提交就丢弃
        drop(store);

        let mut store = EncodingStore::open(&path, true).await.unwrap();
        assert!(store.contains(1).await.unwrap());
        assert!(!store.contains(2).await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.single_face, 1);
        assert_eq!(stats.classified, 0);
    }
}
