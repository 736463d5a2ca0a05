use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::ProgressStyle;
use log::{error, warn};

/// 源数据长度未知，只显示处理数量和速度
pub fn pb_style_speed() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} 条 ({per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// 收到 Ctrl-C 后置位的停止标志
///
/// 正在处理的批次会完整提交，然后退出。
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("收到 Ctrl-C，当前批次完成后退出");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("无法监听 Ctrl-C: {}", e),
        }
    });
    stop
}
