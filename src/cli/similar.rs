use clap::Parser;
use log::info;

use super::{drive, dry_run};
use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, SimilarOptions, SourceOptions};
use crate::encoder::EuclideanComparator;
use crate::pipeline::SimilarTask;

#[derive(Parser, Debug, Clone)]
pub struct SimilarCommand {
    #[command(flatten)]
    pub source: SourceOptions,
    #[command(flatten)]
    pub similar: SimilarOptions,
}

impl SubCommandExtend for SimilarCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let name = format!("similar-{}", self.similar.target);
        if self.source.no_op {
            return dry_run(opts, &self.source, &name).await;
        }

        let output = opts.conf_dir.output().join(&name);
        let db = FaceDBBuilder::new(opts.conf_dir.clone()).open().await?;
        let mut task =
            SimilarTask::new(db, EuclideanComparator, self.similar.target, self.similar.tolerance, &output)
                .await?;

        drive(opts, &self.source, &name, &mut task).await?;

        let stats = task.stats();
        info!("比对 {} 条，相似 {} 条，保存在 {}", stats.compared, stats.matched, output.display());
        task.into_db().close().await?;

        Ok(())
    }
}
