use std::path::PathBuf;

use log::info;

use crate::config::ConfDir;
use crate::db::{EncodingStats, EncodingStore, SegmentStore};
use crate::error::{Error, Result};

pub struct FaceDBBuilder {
    conf_dir: ConfDir,
    wal: bool,
}

impl FaceDBBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir, wal: true }
    }

    /// 特征数据库是否使用 WAL 模式
    pub fn wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    pub async fn open(self) -> Result<FaceDB> {
        tokio::fs::create_dir_all(self.conf_dir.path()).await?;
        let encodings = EncodingStore::open(self.conf_dir.database(), self.wal).await?;
        Ok(FaceDB { conf_dir: self.conf_dir, encodings })
    }
}

/// 数据目录下的全部数据库
pub struct FaceDB {
    conf_dir: ConfDir,
    encodings: EncodingStore,
}

impl FaceDB {
    pub fn conf_dir(&self) -> &ConfDir {
        &self.conf_dir
    }

    pub fn encodings(&mut self) -> &mut EncodingStore {
        &mut self.encodings
    }

    pub async fn stats(&mut self) -> Result<EncodingStats> {
        self.encodings.stats().await
    }

    /// 已有的分段标签，按名称排序
    pub fn segment_labels(&self) -> Result<Vec<String>> {
        let dir = self.conf_dir.segment_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut labels = vec![];
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "db") {
                if let Some(stem) = path.file_stem() {
                    labels.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        labels.sort();
        Ok(labels)
    }

    /// 打开一个已存在的分段数据库
    pub async fn open_segment(&self, label: &str) -> Result<SegmentStore> {
        let path: PathBuf = self.conf_dir.segment(label)?;
        if !path.exists() {
            return Err(Error::InvalidSegment(label.to_string()));
        }
        SegmentStore::open(path, label).await
    }

    pub async fn close(self) -> Result<()> {
        self.encodings.close().await?;
        info!("数据库已关闭");
        Ok(())
    }
}
