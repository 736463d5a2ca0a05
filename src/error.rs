use std::path::PathBuf;

use thiserror::Error;

use crate::{ClassId, RecordId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// 源数据格式错误，立即终止
    #[error("源数据第 {line} 行格式错误: {reason}")]
    MalformedSource { line: u64, reason: String },

    /// 分段标签无法作为分段数据库名称
    #[error("无效的分段标签: {0:?}")]
    InvalidSegment(String),

    #[error("分段 {segment} 中不存在类别 {class_id}")]
    ClassNotFound { segment: String, class_id: ClassId },

    #[error("分段 {segment} 中类别 {class_id} 已存在")]
    ClassConflict { segment: String, class_id: ClassId },

    /// 两级存储之间的不变量被破坏，继续运行会污染聚类结果
    #[error("分段 {segment} / 类别 {class_id:?} / 记录 {record_id}: {reason}")]
    Invariant {
        segment: String,
        class_id: Option<ClassId>,
        record_id: RecordId,
        reason: String,
    },

    #[error("记录 {record_id} 已属于类别 {current}，不能改为 {requested}")]
    Reassignment { record_id: RecordId, current: ClassId, requested: ClassId },

    #[error("断点文件 {} 无效: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    #[error("特征提取失败: {0}")]
    Encoder(String),

    /// 相似搜索的目标记录必须恰好包含一张人脸
    #[error("目标记录 {record_id} 包含 {faces} 张人脸")]
    BadTarget { record_id: RecordId, faces: usize },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("特征序列化失败: {0}")]
    Blob(#[from] bincode::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 解码失败: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// 是否属于必须中止运行的不变量错误
    pub fn is_fatal_invariant(&self) -> bool {
        matches!(
            self,
            Self::Invariant { .. }
                | Self::ClassNotFound { .. }
                | Self::ClassConflict { .. }
                | Self::Reassignment { .. }
        )
    }
}
