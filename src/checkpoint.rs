//! 断点文件
//!
//! 断点文件只包含一个非负整数：已经安全提交的最大记录 ID。断点只会前进，
//! 磁盘上出现更大的值时（例如另一个更晚的运行），拒绝覆盖。

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::RecordId;
use crate::error::{Error, Result};

/// 保存断点的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// 已写入
    Written(RecordId),
    /// 不大于本进程已保存的断点，无需写入
    Stale { saved: RecordId },
    /// 磁盘上的断点更新，拒绝覆盖
    Refused { on_disk: RecordId },
}

#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    /// 本进程观察到的已保存断点
    saved: Option<RecordId>,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), saved: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 本进程观察到的断点，`None` 表示没有任何断点
    pub fn saved(&self) -> Option<RecordId> {
        self.saved
    }

    /// 读取断点，不存在时返回 0
    pub fn load(&mut self) -> Result<RecordId> {
        match self.read()? {
            Some(value) => {
                // 内存中更大的值不会被磁盘上更小的值覆盖
                let value = self.saved.map_or(value, |saved| saved.max(value));
                self.saved = Some(value);
                info!("加载断点: {}", value);
                Ok(value)
            }
            None => {
                info!("未找到断点 {}，从头开始", self.path.display());
                Ok(self.saved.unwrap_or(0))
            }
        }
    }

    /// 保存断点
    pub fn save(&mut self, id: RecordId) -> Result<SaveOutcome> {
        if let Some(saved) = self.saved {
            if id <= saved {
                return Ok(SaveOutcome::Stale { saved });
            }
        }

        if let Some(on_disk) = self.read()? {
            if on_disk > id {
                warn!("发现更新的断点 {}（当前 {}），不保存", on_disk, id);
                self.saved = Some(on_disk);
                return Ok(SaveOutcome::Refused { on_disk });
            }
        }

        let mut tmp_file = self.path.clone();
        tmp_file.set_extension("tmp");
        fs::write(&tmp_file, id.to_string())?;
        fs::rename(&tmp_file, &self.path)?;

        self.saved = Some(id);
        Ok(SaveOutcome::Written(id))
    }

    fn read(&self) -> Result<Option<RecordId>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        text.trim().parse().map(Some).map_err(|e| Error::Checkpoint {
            path: self.path.clone(),
            reason: format!("{e}: {:?}", text.trim()),
        })
    }
}
