//! 人脸特征提取与比对
//!
//! 特征提取算法本身不在本项目内实现，而是通过 [`FaceEncoder`] 接入外部能力。

use std::io::Write;
use std::process::{Command, Stdio};

use log::debug;

use crate::error::{Error, Result};

/// 一张人脸的特征向量
pub type Embedding = Vec<f64>;

/// 从图片中提取人脸特征，图片中有几张人脸就返回几个特征
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &[u8]) -> Result<Vec<Embedding>>;
}

/// 判断两个特征是否属于同一人
pub trait FaceComparator {
    fn matches(&self, known: &[f64], candidate: &[f64], tolerance: f64) -> bool;
}

/// 欧氏距离不超过阈值即视为同一人
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanComparator;

impl FaceComparator for EuclideanComparator {
    fn matches(&self, known: &[f64], candidate: &[f64], tolerance: f64) -> bool {
        known.len() == candidate.len() && face_distance(known, candidate) <= tolerance
    }
}

/// 两个特征之间的欧氏距离
pub fn face_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// 调用外部程序提取特征
///
/// 图片数据通过 stdin 传入，程序需要向 stdout 输出形如 `[[0.1, ...], ...]` 的 JSON，
/// 没有检测到人脸时输出 `[]`。
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: String,
    args: Vec<String>,
}

impl CommandEncoder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl FaceEncoder for CommandEncoder {
    fn encode(&self, image: &[u8]) -> Result<Vec<Embedding>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Encoder(format!("无法启动 {}: {}", self.program, e)))?;

        let mut stdin = child.stdin.take().ok_or_else(|| Error::Encoder("stdin 不可用".into()))?;
        // 一边写入一边读取，避免子进程输出过多时互相阻塞
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || {
                let r = stdin.write_all(image);
                drop(stdin);
                r
            });
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| Err(std::io::Error::other("writer panicked")));
            output.and_then(|output| written.map(|_| output))
        })?;

        if !output.status.success() {
            return Err(Error::Encoder(format!("{} 退出状态 {}", self.program, output.status)));
        }

        let embeddings: Vec<Embedding> = serde_json::from_slice(&output.stdout)?;
        debug!("提取到 {} 张人脸", embeddings.len());
        Ok(embeddings)
    }
}
