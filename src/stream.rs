//! 源数据读取
//!
//! 源文件是一个不带表头的 TSV，单个文件可能有上百 GB，因此只能按批次顺序读取。
//! 记录的 ID 由其在文件中的位置决定（从 0 开始，跳过空行），而不是行内的某个字段。

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::RecordId;
use crate::error::{Error, Result};

/// 分段标签与图片数据所在的列
#[derive(Debug, Clone, Copy)]
pub struct Columns {
    pub segment: usize,
    pub payload: usize,
}

impl Default for Columns {
    fn default() -> Self {
        Self { segment: 0, payload: 6 }
    }
}

/// 源数据中的一条记录
#[derive(Debug, Clone)]
pub struct Record {
    pub id: RecordId,
    pub segment: String,
    /// base64 编码的图片
    pub payload: String,
}

impl Record {
    /// 解码图片数据
    pub fn image(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(self.payload.trim())?)
    }
}

/// 一个批次的记录，ID 严格递增且非空
///
/// 只能由 [`RecordStream`] 构造。
#[derive(Debug, Clone)]
pub struct Chunk {
    records: Vec<Record>,
}

impl Chunk {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn first_id(&self) -> RecordId {
        self.records[0].id
    }

    pub fn last_id(&self) -> RecordId {
        self.records[self.records.len() - 1].id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct RecordStream<R> {
    reader: R,
    chunk_size: usize,
    columns: Columns,
    next_id: RecordId,
    line_no: u64,
    buffer: String,
    exhausted: bool,
}

impl RecordStream<BufReader<File>> {
    /// 打开源文件，每次重新打开都从头开始读取
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize, columns: Columns) -> Result<Self> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self::new(BufReader::with_capacity(4 << 20, file), chunk_size, columns))
    }
}

impl<R: AsyncBufRead + Unpin> RecordStream<R> {
    pub fn new(reader: R, chunk_size: usize, columns: Columns) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            columns,
            next_id: 0,
            line_no: 0,
            buffer: String::new(),
            exhausted: false,
        }
    }

    /// 读取下一个批次，数据读完时返回 `None`，最后一个批次可能不满
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut records = Vec::with_capacity(self.chunk_size);
        while records.len() < self.chunk_size {
            match self.next_record().await? {
                Some(record) => records.push(record),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if records.is_empty() { Ok(None) } else { Ok(Some(Chunk { records })) }
    }

    async fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.buffer.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let record = parse_line(line, self.line_no, self.columns, self.next_id)?;
            self.next_id += 1;
            return Ok(Some(record));
        }
    }
}

fn parse_line(line: &str, line_no: u64, columns: Columns, id: RecordId) -> Result<Record> {
    let fields = line.split('\t').collect::<Vec<_>>();
    let field = |n: usize| {
        fields.get(n).copied().ok_or_else(|| Error::MalformedSource {
            line: line_no,
            reason: format!("只有 {} 列，缺少第 {} 列", fields.len(), n),
        })
    };

    let segment = field(columns.segment)?.trim();
    if segment.is_empty() {
        return Err(Error::MalformedSource { line: line_no, reason: "分段标签为空".to_string() });
    }
    let payload = field(columns.payload)?;

    Ok(Record { id, segment: segment.to_string(), payload: payload.to_string() })
}
