pub mod checkpoint;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod db;
pub mod encoder;
pub mod error;
pub mod facedb;
pub mod orchestrator;
pub mod pipeline;
pub mod stream;
pub mod utils;

/// 记录在源数据中的序号，从 0 开始
pub type RecordId = u64;
/// 类别在分段内的序号，从 0 开始连续分配
pub type ClassId = u32;

pub use config::Opts;
pub use error::{Error, Result};
pub use facedb::{FaceDB, FaceDBBuilder};
