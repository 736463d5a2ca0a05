use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::error::{Error, Result};
use crate::stream::Columns;

/// 聚类时判断为同一人的默认距离阈值
pub const CLUSTER_TOLERANCE: f64 = 0.55;
/// 相似人脸搜索的默认距离阈值
pub const SIMILAR_TOLERANCE: f64 = 0.54;
/// 默认每个批次的记录数量
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "faceclass", "faceclass").expect("failed to get project dir");
    ConfDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct SourceOptions {
    /// 源数据 TSV 文件
    pub source: PathBuf,
    /// 每个批次的记录数量，一个批次是提交和保存断点的最小单位
    #[arg(short = 's', long, value_name = "SIZE", default_value_t = DEFAULT_CHUNK_SIZE, value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
    pub chunk_size: usize,
    /// 指定处理范围（闭区间），忽略已保存的断点
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub range: Option<Vec<u64>>,
    /// 只遍历数据，不做任何处理
    #[arg(short, long)]
    pub no_op: bool,
    /// 分段标签所在的列
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub segment_column: usize,
    /// base64 图片所在的列
    #[arg(long, value_name = "N", default_value_t = 6)]
    pub payload_column: usize,
}

impl SourceOptions {
    pub fn columns(&self) -> Columns {
        Columns { segment: self.segment_column, payload: self.payload_column }
    }

    pub fn range(&self) -> Option<(u64, u64)> {
        self.range.as_deref().map(|r| (r[0], r[1]))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ClusterOptions {
    /// 两张人脸被视为同一人的最大距离
    #[arg(short, long, value_name = "DISTANCE", default_value_t = CLUSTER_TOLERANCE)]
    pub tolerance: f64,
    /// 与已有类别比对时的扫描方式
    #[arg(long, value_enum, default_value_t = ScanMode::FirstMatch)]
    pub scan_mode: ScanMode,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self { tolerance: CLUSTER_TOLERANCE, scan_mode: ScanMode::FirstMatch }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct EncoderOptions {
    /// 特征提取程序，从 stdin 读取图片，向 stdout 输出 JSON 格式的特征列表
    #[arg(short, long, value_name = "PROGRAM")]
    pub encoder: String,
    /// 传递给特征提取程序的参数，可重复
    #[arg(long = "encoder-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub encoder_args: Vec<String>,
    /// 并行提取的线程数
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub jobs: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct SimilarOptions {
    /// 目标记录 ID，该记录必须恰好有一张人脸
    #[arg(long, value_name = "ID")]
    pub target: u64,
    /// 两张人脸被视为相似的最大距离
    #[arg(short, long, value_name = "DISTANCE", default_value_t = SIMILAR_TOLERANCE)]
    pub tolerance: f64,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "faceclass", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// faceclass 数据目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取人脸特征并写入数据库
    Extract(ExtractCommand),
    /// 按分段对人脸进行增量聚类
    Classify(ClassifyCommand),
    /// 将聚类结果按 分段/类别 导出为图片
    Export(ExportCommand),
    /// 搜索与指定记录相似的人脸
    Similar(SimilarCommand),
    /// 查看数据库统计信息
    Show(ShowCommand),
}

/// 扫描已有类别的方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// 按热门程度扫描，遇到第一个匹配的类别即停止
    #[value(name = "first")]
    FirstMatch,
    /// 扫描全部类别，每个匹配的类别计数都加一，记录归入最后一个匹配的类别
    #[value(name = "all")]
    AllMatches,
}

/// 分段标签会被用作文件名，必须是单独的一级路径
pub fn check_label(label: &str) -> Result<&str> {
    let mut components = Path::new(label).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !label.contains(['/', '\\']) => Ok(label),
        _ => Err(Error::InvalidSegment(label.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回特征数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("encodings.db")
    }

    /// 返回分段数据库所在目录
    pub fn segment_dir(&self) -> PathBuf {
        self.path.join("segment_db")
    }

    /// 返回分段数据库文件的路径
    pub fn segment(&self, label: &str) -> Result<PathBuf> {
        Ok(self.segment_dir().join(format!("{}.db", check_label(label)?)))
    }

    /// 返回断点文件的路径
    pub fn breakpoint(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.bkpt"))
    }

    /// 返回导出目录
    pub fn output(&self) -> PathBuf {
        self.path.join("output")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_paths_reject_traversal() {
        let conf = ConfDir::new("/data");
        assert_eq!(conf.segment("m.0abc").unwrap(), PathBuf::from("/data/segment_db/m.0abc.db"));
        assert!(matches!(conf.segment(""), Err(Error::InvalidSegment(_))));
        assert!(matches!(conf.segment(".."), Err(Error::InvalidSegment(_))));
        assert!(matches!(conf.segment("a/b"), Err(Error::InvalidSegment(_))));
        assert!(matches!(conf.segment("/abs"), Err(Error::InvalidSegment(_))));
    }

    #[test]
    fn range_is_parsed_as_pair() {
        let opts = Opts::try_parse_from([
            "faceclass", "-c", "/tmp/x", "classify", "data.tsv", "--range", "10", "20",
        ])
        .unwrap();
        match opts.subcmd {
            SubCommand::Classify(cmd) => {
                assert_eq!(cmd.source.range(), Some((10, 20)));
                assert_eq!(cmd.source.chunk_size, DEFAULT_CHUNK_SIZE);
                assert_eq!(cmd.cluster.scan_mode, ScanMode::FirstMatch);
                assert_eq!(cmd.cluster.tolerance, CLUSTER_TOLERANCE);
            }
            other => panic!("unexpected subcommand {other:?}"),
        }
    }
}
