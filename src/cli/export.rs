use std::path::PathBuf;

use clap::Parser;
use log::info;

use super::{drive, dry_run};
use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, SourceOptions};
use crate::pipeline::{ExportLayout, ExportTask};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    #[command(flatten)]
    pub source: SourceOptions,
    /// 只导出成员数量不少于该值的类别
    #[arg(short, long, value_name = "N", default_value_t = 10)]
    pub min_members: u64,
    /// 导出目录，默认为数据目录下的 output
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        if self.source.no_op {
            return dry_run(opts, &self.source, "export").await;
        }

        let output = self.output.clone().unwrap_or_else(|| opts.conf_dir.output());
        info!("导出到 {}", output.display());

        let db = FaceDBBuilder::new(opts.conf_dir.clone()).open().await?;
        let mut task = ExportTask::new(db, ExportLayout::new(output), self.min_members);

        drive(opts, &self.source, "export", &mut task).await?;

        let stats = task.stats();
        info!(
            "导出 {} 张，未分类 {} 张，类别过小 {} 张",
            stats.exported, stats.unclassified, stats.too_few_members
        );
        task.into_db().close().await?;

        Ok(())
    }
}
