// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频输入系统 (Video Input System)
///
/// 每路摄像头一个采集线程, 负责解码与循环播放
/// - FrameSource:   视频源接口
/// - FfmpegSource:  FFmpeg 解码 (文件 / RTSP)
/// - StillImageSource: 单帧图片循环
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod source;
pub mod still;

#[cfg(feature = "ffmpeg")]
pub use decoder::{FfmpegSource, FfmpegSourceFactory};
pub use source::{Frame, FrameSource, ReadOutcome, SourceFactory};
pub use still::StillImageSource;

use crate::config::CameraConfig;
use anyhow::Result;

/// 默认视频源工厂: 图片走静态源, 其余交给 FFmpeg
pub struct DefaultSourceFactory {
    pub default_fps: f64,
}

impl SourceFactory for DefaultSourceFactory {
    fn open(&self, camera: &CameraConfig, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
        let fps = camera.fps.unwrap_or(self.default_fps);
        if still::is_image_path(&camera.source) {
            return Ok(Box::new(StillImageSource::open(
                &camera.source,
                width,
                height,
                fps,
            )?));
        }

        #[cfg(feature = "ffmpeg")]
        {
            FfmpegSourceFactory {
                default_fps: self.default_fps,
            }
            .open(camera, width, height)
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            anyhow::bail!(
                "camera {}: video source {} requires the `ffmpeg` feature",
                camera.id,
                camera.source
            )
        }
    }
}
