use clap::Parser;
use log::info;

use super::{drive, dry_run};
use crate::FaceDBBuilder;
use crate::classifier::Classifier;
use crate::cli::SubCommandExtend;
use crate::config::{ClusterOptions, Opts, SourceOptions};
use crate::encoder::EuclideanComparator;
use crate::pipeline::{ClassifyTask, ExportLayout};

#[derive(Parser, Debug, Clone)]
pub struct ClassifyCommand {
    #[command(flatten)]
    pub source: SourceOptions,
    #[command(flatten)]
    pub cluster: ClusterOptions,
    /// 分类的同时按 分段/类别 导出图片
    #[arg(long)]
    pub dump: bool,
}

impl SubCommandExtend for ClassifyCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        if self.source.no_op {
            return dry_run(opts, &self.source, "classify").await;
        }

        let db = FaceDBBuilder::new(opts.conf_dir.clone()).open().await?;
        let mut task = ClassifyTask::new(db, Classifier::new(EuclideanComparator, &self.cluster));
        if self.dump {
            task = task.dump_to(ExportLayout::new(opts.conf_dir.output()));
        }

        drive(opts, &self.source, "classify", &mut task).await?;

        let stats = task.stats();
        info!(
            "新建类别 {}，归入已有类别 {}，已分类 {}，恢复 {}，非单人脸 {}，缺少特征 {}",
            stats.created,
            stats.matched,
            stats.already_classified,
            stats.recovered,
            stats.not_single_face,
            stats.missing
        );
        info!("打开分段数据库 {} 次", stats.segments_opened);
        task.into_db().close().await?;

        Ok(())
    }
}
