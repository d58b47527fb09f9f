// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 录像 (Recording)
///
/// - IncidentRecorder: 事件片段录制 (带宽限窗口)
/// - ClipWriter:       Motion-JPEG 写入
/// - Mp4Opener:        H.264/MP4 片段 (FFmpeg 转码)
/// - RecordingLibrary: 录像列表与文件名校验
pub mod library;
pub mod recorder;
#[cfg(feature = "ffmpeg")]
pub mod transcode;
pub mod writer;

pub use library::{LibraryError, RecordingLibrary};
pub use recorder::{IncidentRecorder, RecorderEvent, RecorderState};
#[cfg(feature = "ffmpeg")]
pub use transcode::Mp4Opener;
pub use writer::{ClipOpener, ClipWriter, MjpegOpener, MjpegWriter};

use crate::config::ClipFormat;

/// 按配置选择事件片段写入器; `fps` 在每个片段打开时读取
pub fn clip_opener<F>(format: ClipFormat, quality: u8, fps: F) -> Box<dyn ClipOpener>
where
    F: Fn() -> f64 + Send + 'static,
{
    match format {
        #[cfg(feature = "ffmpeg")]
        ClipFormat::Mp4 => Box::new(Mp4Opener::new(quality, fps)),
        #[cfg(not(feature = "ffmpeg"))]
        ClipFormat::Mp4 => {
            drop(fps);
            Box::new(MjpegOpener { quality })
        }
        ClipFormat::Mjpeg => Box::new(MjpegOpener { quality }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_opener_extension() {
        assert_eq!(clip_opener(ClipFormat::Mjpeg, 80, || 30.0).extension(), "mjpeg");
        #[cfg(feature = "ffmpeg")]
        assert_eq!(clip_opener(ClipFormat::Mp4, 80, || 30.0).extension(), "mp4");
    }
}
