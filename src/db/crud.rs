use sqlx::{Executor, Result, Sqlite};

use super::{ClassStat, EncodingRow, EncodingStats};

/// 获取一条特征记录
pub async fn get_encoding<'c, E>(executor: E, id: i64) -> Result<Option<EncodingRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, EncodingRow>(
        r#"
        SELECT id, embeddings, face_count, class_id FROM encodings WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// 检查特征记录是否存在
pub async fn has_encoding<'c, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM encodings WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

/// 添加特征记录，已存在时忽略
pub async fn add_encoding<'c, E>(executor: E, id: i64, embeddings: &[u8], face_count: i64) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO encodings (id, embeddings, face_count)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(embeddings)
    .bind(face_count)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// 更新人脸数量
pub async fn set_face_count<'c, E>(executor: E, id: i64, face_count: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE encodings SET face_count = ? WHERE id = ?
        "#,
    )
    .bind(face_count)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(())
}

/// 设置记录所属类别
pub async fn set_class<'c, E>(executor: E, id: i64, class_id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE encodings SET class_id = ? WHERE id = ?
        "#,
    )
    .bind(class_id)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(())
}

/// 统计特征数据库
pub async fn get_encoding_stats<'c, E>(executor: E) -> Result<EncodingStats>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (records, single_face, classified) = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(face_count = 1), 0),
            COALESCE(SUM(class_id IS NOT NULL), 0)
        FROM encodings
        "#,
    )
    .fetch_one(executor)
    .await?;

    Ok(EncodingStats {
        records: records as u64,
        single_face: single_face as u64,
        classified: classified as u64,
    })
}

/// 按成员数量降序、类别 ID 升序列出类别
pub async fn get_classes_by_popularity<'c, E>(executor: E) -> Result<Vec<ClassStat>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ClassStat>(
        r#"
        SELECT class_id, representative_id, member_count FROM seen_classes
        ORDER BY member_count DESC, class_id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 获取单个类别
pub async fn get_class<'c, E>(executor: E, class_id: i64) -> Result<Option<ClassStat>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ClassStat>(
        r#"
        SELECT class_id, representative_id, member_count FROM seen_classes WHERE class_id = ?
        "#,
    )
    .bind(class_id)
    .fetch_optional(executor)
    .await
}

/// 根据代表记录查找类别
pub async fn get_class_by_representative<'c, E>(executor: E, record_id: i64) -> Result<Option<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT class_id FROM seen_classes WHERE representative_id = ?
        "#,
    )
    .bind(record_id)
    .fetch_optional(executor)
    .await
}

/// 类别数量与最大类别 ID
///
/// NOTE: 类别 ID 从 0 开始连续分配且从不删除，正常情况下 max + 1 == count
pub async fn get_class_span<'c, E>(executor: E) -> Result<(i64, Option<i64>)>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, (i64, Option<i64>)>(
        r#"
        SELECT COUNT(*), MAX(class_id) FROM seen_classes
        "#,
    )
    .fetch_one(executor)
    .await
}

/// 新增类别，成员数量为 1
pub async fn add_class<'c, E>(executor: E, class_id: i64, representative_id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO seen_classes (class_id, representative_id, member_count)
        VALUES (?, ?, 1)
        "#,
    )
    .bind(class_id)
    .bind(representative_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// 类别成员数量加一，返回受影响的行数
pub async fn increase_class_count<'c, E>(executor: E, class_id: i64) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE seen_classes SET member_count = member_count + 1 WHERE class_id = ?
        "#,
    )
    .bind(class_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// 记录归入类别
pub async fn add_member<'c, E>(executor: E, record_id: i64, class_id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO members (record_id, class_id) VALUES (?, ?)
        "#,
    )
    .bind(record_id)
    .bind(class_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// 查找记录所属的类别
pub async fn get_member_class<'c, E>(executor: E, record_id: i64) -> Result<Option<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT class_id FROM members WHERE record_id = ?
        "#,
    )
    .bind(record_id)
    .fetch_optional(executor)
    .await
}
