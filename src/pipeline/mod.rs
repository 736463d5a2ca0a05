//! 各子命令的批次处理逻辑

mod classify;
mod export;
mod extract;
mod similar;

use std::fs;
use std::path::{Path, PathBuf};

pub use classify::*;
pub use export::*;
pub use extract::*;
pub use similar::*;

use crate::config::check_label;
use crate::error::Result;
use crate::stream::Record;
use crate::{ClassId, RecordId};

/// 导出图片的目录结构：`<root>/<分段>/<类别>/<记录>.jpg`
#[derive(Debug, Clone)]
pub struct ExportLayout {
    root: PathBuf,
}

impl ExportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_path(&self, segment: &str, class_id: ClassId, record_id: RecordId) -> Result<PathBuf> {
        Ok(self.root.join(check_label(segment)?).join(class_id.to_string()).join(format!("{record_id}.jpg")))
    }

    /// 写入记录的图片，已存在时覆盖
    pub fn dump(&self, record: &Record, class_id: ClassId) -> Result<PathBuf> {
        let path = self.class_path(&record.segment, class_id, record.id)?;
        write_image(&path, record)?;
        Ok(path)
    }
}

fn write_image(path: &Path, record: &Record) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, record.image()?)?;
    Ok(())
}
