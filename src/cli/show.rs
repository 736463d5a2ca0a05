use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde_json::json;

use crate::FaceDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 分段标签，不指定时显示特征数据库的统计信息
    pub segment: Option<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = FaceDBBuilder::new(opts.conf_dir.clone()).open().await?;

        match &self.segment {
            Some(label) => {
                let mut segment = db.open_segment(label).await?;
                let classes = segment.classes().await?;
                match self.output_format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&classes)?),
                    OutputFormat::Table => {
                        println!("class\trepresentative\tmembers");
                        for class in &classes {
                            println!("{}\t{}\t{}", class.class_id, class.representative_id, class.member_count);
                        }
                    }
                }
                segment.close().await?;
            }
            None => {
                let stats = db.stats().await?;
                let segments = db.segment_labels()?;
                match self.output_format {
                    OutputFormat::Json => {
                        let value = json!({ "stats": stats, "segments": segments });
                        println!("{}", serde_json::to_string_pretty(&value)?)
                    }
                    OutputFormat::Table => {
                        println!("records\t{}", stats.records);
                        println!("single_face\t{}", stats.single_face);
                        println!("classified\t{}", stats.classified);
                        println!("segments\t{}", segments.len());
                        for label in &segments {
                            println!("\t{}", label);
                        }
                    }
                }
            }
        }

        db.close().await?;
        Ok(())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
