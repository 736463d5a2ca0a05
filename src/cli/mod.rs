mod classify;
mod export;
mod extract;
mod show;
mod similar;

pub use classify::*;
pub use export::*;
pub use extract::*;
pub use show::*;
pub use similar::*;

use indicatif::ProgressBar;
use log::info;

use crate::checkpoint::CheckpointManager;
use crate::config::{Opts, SourceOptions};
use crate::orchestrator::{ChunkHandler, Orchestrator, RunSummary};
use crate::stream::RecordStream;
use crate::utils::{interrupt_flag, pb_style_speed};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>>;
}

/// 从断点继续，按批次处理整个源文件
async fn drive<H: ChunkHandler>(
    opts: &Opts,
    source: &SourceOptions,
    breakpoint: &str,
    handler: &mut H,
) -> anyhow::Result<RunSummary> {
    let mut stream = RecordStream::open(&source.source, source.chunk_size, source.columns()).await?;
    let checkpoint = CheckpointManager::new(opts.conf_dir.breakpoint(breakpoint));

    let pb = ProgressBar::no_length().with_style(pb_style_speed());
    let mut orchestrator =
        Orchestrator::new(checkpoint, source.range())?.stop_flag(interrupt_flag()).progress(pb.clone());
    let summary = orchestrator.run(&mut stream, handler).await?;

    if summary.interrupted {
        pb.abandon_with_message("已中断");
    } else {
        pb.finish_with_message("处理完成");
    }
    info!(
        "共 {} 个批次，跳过 {} 个，处理 {} 条记录",
        summary.chunks, summary.skipped_chunks, summary.records
    );
    Ok(summary)
}

/// 只遍历源文件，不打开任何数据库
async fn dry_run(opts: &Opts, source: &SourceOptions, breakpoint: &str) -> anyhow::Result<()> {
    let mut stream = RecordStream::open(&source.source, source.chunk_size, source.columns()).await?;
    let checkpoint = CheckpointManager::new(opts.conf_dir.breakpoint(breakpoint));

    let pb = ProgressBar::no_length().with_style(pb_style_speed());
    let summary = Orchestrator::new(checkpoint, source.range())?.progress(pb.clone()).dry_run(&mut stream).await?;
    pb.finish_and_clear();

    info!("共 {} 个批次，{} 条记录需要处理", summary.chunks, summary.records);
    Ok(())
}
