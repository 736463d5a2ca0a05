use std::sync::Arc;

use clap::Parser;
use log::info;

use super::{drive, dry_run};
use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{EncoderOptions, Opts, SourceOptions};
use crate::encoder::CommandEncoder;
use crate::pipeline::ExtractTask;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub source: SourceOptions,
    #[command(flatten)]
    pub encoding: EncoderOptions,
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        if self.source.no_op {
            return dry_run(opts, &self.source, "extract").await;
        }

        let db = FaceDBBuilder::new(opts.conf_dir.clone()).open().await?;
        let encoder = CommandEncoder::new(&self.encoding.encoder, self.encoding.encoder_args.clone());
        let mut task = ExtractTask::new(db, Arc::new(encoder), self.encoding.jobs)?;

        drive(opts, &self.source, "extract", &mut task).await?;

        let stats = task.stats();
        info!(
            "新提取 {} 条（{} 张人脸），已存在 {} 条，失败 {} 条",
            stats.extracted, stats.faces, stats.existing, stats.failed
        );
        task.into_db().close().await?;

        Ok(())
    }
}
