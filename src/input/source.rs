// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频源抽象
/// Frame source abstraction
use crate::config::CameraConfig;
use crate::CameraId;
use anyhow::Result;
use image::RgbImage;
use std::time::{Duration, Instant};

/// 已解码帧 (采集线程 → 处理线程)
#[derive(Clone, Debug)]
pub struct Frame {
    pub camera: CameraId,
    /// 单调递增帧序号 (每次启动从0开始)
    pub seq: u64,
    pub captured_at: Instant,
    pub image: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 单次读取结果
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(RgbImage),
    /// 源已读完, 需要 `rewind`
    EndOfStream,
    /// 超时内没有新帧
    Pending,
}

/// 视频源: 文件或实时流
pub trait FrameSource: Send {
    /// 最多等待 `timeout` 读取一帧
    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome>;

    /// 从头重新打开
    fn rewind(&mut self) -> Result<()>;

    /// 源的名义帧率
    fn fps(&self) -> f64;

    /// 实时流不需要按帧率节流
    fn is_live(&self) -> bool {
        false
    }
}

/// 为摄像头创建视频源
pub trait SourceFactory: Send + Sync {
    fn open(&self, camera: &CameraConfig, width: u32, height: u32) -> Result<Box<dyn FrameSource>>;
}

/// 是否为网络流地址
pub fn is_stream_locator(locator: &str) -> bool {
    const SCHEMES: [&str; 5] = ["rtsp://", "rtsps://", "rtmp://", "http://", "https://"];
    let lower = locator.to_ascii_lowercase();
    SCHEMES.iter().any(|s| lower.starts_with(s))
}
