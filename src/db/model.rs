use serde::Serialize;

use crate::encoder::Embedding;
use crate::error::Result;
use crate::{ClassId, RecordId};

/// 特征数据库中的一行
#[derive(sqlx::FromRow)]
pub struct EncodingRow {
    pub id: i64,
    /// bincode 序列化的 `Vec<Embedding>`
    pub embeddings: Vec<u8>,
    pub face_count: i64,
    pub class_id: Option<i64>,
}

/// 单条记录的人脸特征及分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingRecord {
    pub id: RecordId,
    pub embeddings: Vec<Embedding>,
    /// 检测到的人脸数量，恒等于 `embeddings.len()`
    pub face_count: usize,
    /// 只有恰好一张人脸且已分类的记录才有类别
    pub class_id: Option<ClassId>,
}

impl TryFrom<EncodingRow> for EncodingRecord {
    type Error = crate::Error;

    fn try_from(row: EncodingRow) -> Result<Self> {
        let embeddings: Vec<Embedding> = bincode::deserialize(&row.embeddings)?;
        Ok(Self {
            id: row.id as RecordId,
            face_count: embeddings.len(),
            embeddings,
            class_id: row.class_id.map(|c| c as ClassId),
        })
    }
}

/// 分段数据库中的一个类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ClassStat {
    pub class_id: i64,
    /// 第一个归入该类别的记录，之后所有比对都以它为准
    pub representative_id: i64,
    /// 成员数量，仅用于排序
    pub member_count: i64,
}

/// 特征数据库统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct EncodingStats {
    pub records: u64,
    pub single_face: u64,
    pub classified: u64,
}
