//! 按批次驱动整个流程
//!
//! 一个批次是处理、提交、保存断点的最小单位：批次内的记录全部处理完后，先提交所有数据库，
//! 再保存断点。批次中途崩溃时，重启后整个批次重新处理，因此每一步都必须可以重复执行。

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::ProgressBar;
use log::{debug, info, warn};
use tokio::io::AsyncBufRead;

use crate::RecordId;
use crate::checkpoint::{CheckpointManager, SaveOutcome};
use crate::config::ConfDir;
use crate::db::SegmentStore;
use crate::error::Result;
use crate::stream::{Record, RecordStream};

/// 批次处理逻辑
pub trait ChunkHandler {
    /// 处理批次中需要处理的记录，按顺序逐条进行
    fn process(&mut self, records: &[&Record], pb: &ProgressBar) -> impl Future<Output = Result<()>>;

    /// 批次结束，提交所有缓冲的写入
    fn commit(&mut self) -> impl Future<Output = Result<()>>;

    /// 全部批次结束
    fn finish(&mut self) -> impl Future<Output = Result<()>>;
}

/// 需要处理的记录 ID 范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Window {
    /// 处理全部记录
    #[default]
    All,
    /// 只处理断点之后的记录
    After(RecordId),
    /// 只处理闭区间内的记录
    Range(RecordId, RecordId),
}

impl Window {
    pub fn admits(&self, id: RecordId) -> bool {
        match *self {
            Self::All => true,
            Self::After(bkpt) => id > bkpt,
            Self::Range(start, end) => start <= id && id <= end,
        }
    }

    /// 从这条记录开始，之后的记录都不需要处理
    pub fn is_past(&self, id: RecordId) -> bool {
        matches!(*self, Self::Range(_, end) if id > end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 读取的批次数量
    pub chunks: usize,
    /// 因已处理而整体跳过的批次数量
    pub skipped_chunks: usize,
    /// 处理的记录数量
    pub records: usize,
    /// 是否因中断而提前退出
    pub interrupted: bool,
}

pub struct Orchestrator {
    checkpoint: CheckpointManager,
    window: Window,
    stop: Arc<AtomicBool>,
    pb: ProgressBar,
}

impl Orchestrator {
    /// 加载断点；指定了范围时，按范围处理而不是从断点继续
    pub fn new(mut checkpoint: CheckpointManager, range: Option<(RecordId, RecordId)>) -> Result<Self> {
        checkpoint.load()?;
        let window = match (range, checkpoint.saved()) {
            (Some((start, end)), _) => {
                info!("处理范围: {} - {}", start, end);
                Window::Range(start, end)
            }
            (None, Some(bkpt)) => Window::After(bkpt),
            (None, None) => Window::All,
        };
        Ok(Self { checkpoint, window, stop: Arc::new(AtomicBool::new(false)), pb: ProgressBar::hidden() })
    }

    /// 在批次之间检查的停止标志
    pub fn stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn checkpoint(&self) -> &CheckpointManager {
        &self.checkpoint
    }

    pub async fn run<R, H>(&mut self, stream: &mut RecordStream<R>, handler: &mut H) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        H: ChunkHandler,
    {
        let mut summary = RunSummary::default();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                warn!("收到中断信号，停止处理");
                summary.interrupted = true;
                break;
            }

            let Some(chunk) = stream.next_chunk().await? else {
                break;
            };
            summary.chunks += 1;

            let (first, last) = (chunk.first_id(), chunk.last_id());
            if self.window.is_past(first) {
                info!("已到达指定范围");
                break;
            }

            let records = chunk.records().iter().filter(|r| self.window.admits(r.id)).collect::<Vec<_>>();
            let Some(processed) = records.last().map(|r| r.id) else {
                debug!("跳过批次 {} - {}：已处理", first, last);
                summary.skipped_chunks += 1;
                continue;
            };

            self.pb.set_message(format!("批次 {first} - {last}"));
            handler.process(&records, &self.pb).await?;
            handler.commit().await?;
            summary.records += records.len();

            // 断点比已处理的最后一条记录小 1，重启后最后一条会被重新处理
            match self.checkpoint.save(processed.saturating_sub(1))? {
                SaveOutcome::Written(id) => info!("批次 {} - {} 完成，断点 {} 已保存", first, last, id),
                SaveOutcome::Stale { saved } => debug!("断点 {} 未变化", saved),
                SaveOutcome::Refused { on_disk } => warn!("断点未保存，磁盘上已有更新的断点 {}", on_disk),
            }
        }

        handler.finish().await?;
        Ok(summary)
    }

    /// 只遍历数据，不打开任何数据库
    pub async fn dry_run<R>(&mut self, stream: &mut RecordStream<R>) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = RunSummary::default();
        while let Some(chunk) = stream.next_chunk().await? {
            summary.chunks += 1;
            if self.window.is_past(chunk.first_id()) {
                info!("已到达指定范围");
                break;
            }
            let admitted = chunk.records().iter().filter(|r| self.window.admits(r.id)).count();
            if admitted == 0 {
                summary.skipped_chunks += 1;
            }
            summary.records += admitted;
            info!("批次 {} - {}：{} 条需要处理", chunk.first_id(), chunk.last_id(), admitted);
            self.pb.inc(chunk.len() as u64);
        }
        Ok(summary)
    }
}

/// 当前打开的分段数据库
///
/// 假定同一分段的记录在源数据中是连续的：分段标签变化时关闭旧的分段数据库并打开新的。
/// 分段不连续时只会告警，重新打开的分段从已提交的状态继续。
pub struct SegmentSlot {
    conf_dir: ConfDir,
    current: Option<SegmentStore>,
    seen: HashSet<String>,
    opened: usize,
}

impl SegmentSlot {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir, current: None, seen: HashSet::new(), opened: 0 }
    }

    /// 当前打开的分段
    pub fn active(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.label())
    }

    /// 打开过的分段数据库次数
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// 切换到指定分段，返回分段数据库以及是否发生了切换
    pub async fn switch_to(&mut self, label: &str) -> Result<(&mut SegmentStore, bool)> {
        let (store, switched) = match self.current.take() {
            Some(store) if store.label() == label => (store, false),
            previous => {
                if let Some(previous) = previous {
                    previous.close().await?;
                }
                if !self.seen.insert(label.to_string()) {
                    warn!("分段 {} 在源数据中不连续，重新打开", label);
                }
                let store = SegmentStore::open(self.conf_dir.segment(label)?, label).await?;
                self.opened += 1;
                debug!("切换到分段 {}", label);
                (store, true)
            }
        };
        Ok((self.current.insert(store), switched))
    }

    /// 提交当前分段的写入，保持打开
    pub async fn flush(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(store) => store.flush().await,
            None => Ok(()),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }
}
