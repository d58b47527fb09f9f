// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! MP4 (H.264) 事件片段
//!
//! 录制期间先把帧写成 MJPEG 暂存在 `.spool/` 下, 关闭时由后台线程用 FFmpeg
//! 转码成 yuv420p H.264 再移入录像目录. 转码失败时保留 MJPEG 片段.

use super::writer::{ClipOpener, ClipWriter, MjpegWriter};
use anyhow::{anyhow, Context, Result};
use ez_ffmpeg::{FfmpegContext, Input, Output};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// 暂存目录 (录像库只列出目录下的文件, 不会列出这里的内容)
const SPOOL_DIR: &str = ".spool";

type Pending = Arc<Mutex<Vec<JoinHandle<()>>>>;
type Transcoder = fn(&Path, &Path, f64) -> Result<()>;

/// MJPEG → H.264 MP4
pub fn transcode_mjpeg_to_mp4(spool: &Path, staged: &Path, fps: f64) -> Result<()> {
    let src = spool.to_string_lossy().to_string();
    let dst = staged.to_string_lossy().to_string();
    let rate = format!("{:.3}", fps);

    let input = Input::new(src.as_str()).set_input_opts([("framerate", rate.as_str())].into());
    let output = Output::from(dst.as_str()).set_video_codec("libx264");

    FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=yuv420p"].into())
        .output(output)
        .build()
        .map_err(|e| anyhow!("构建转码任务失败: {}", e))?
        .start()
        .map_err(|e| anyhow!("启动转码失败: {}", e))?
        .wait()
        .map_err(|e| anyhow!("转码失败: {}", e))
}

/// 转码并移入目标路径, 返回最终文件
fn finalize(spool: &Path, target: &Path, fps: f64, transcode: Transcoder) -> Result<PathBuf> {
    let staged = spool.with_extension("mp4");
    match transcode(spool, &staged, fps) {
        Ok(()) => {
            std::fs::rename(&staged, target)
                .with_context(|| format!("failed to move clip to {}", target.display()))?;
            let _ = std::fs::remove_file(spool);
            Ok(target.to_path_buf())
        }
        Err(e) => {
            warn!("⚠️ {} 转码失败, 保留 MJPEG: {:#}", target.display(), e);
            let _ = std::fs::remove_file(&staged);
            let fallback = target.with_extension("mjpeg");
            std::fs::rename(spool, &fallback)
                .with_context(|| format!("failed to move clip to {}", fallback.display()))?;
            Ok(fallback)
        }
    }
}

pub struct Mp4Writer {
    spool: Box<MjpegWriter>,
    target: PathBuf,
    fps: f64,
    transcode: Transcoder,
    pending: Pending,
}

impl ClipWriter for Mp4Writer {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.spool.write_frame(frame)
    }

    fn write_encoded(&mut self, jpeg: &[u8]) -> Result<()> {
        self.spool.write_encoded(jpeg)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let Mp4Writer {
            spool,
            target,
            fps,
            transcode,
            pending,
        } = *self;
        let frames = spool.frames();
        let spool_path = spool.path().to_path_buf();
        spool.finish()?;

        if frames == 0 {
            let _ = std::fs::remove_file(&spool_path);
            return Ok(());
        }

        debug!("🎞️ 转码 {} ({} 帧 @ {:.1}fps)", target.display(), frames, fps);
        let handle = std::thread::Builder::new()
            .name("clip-transcode".to_string())
            .spawn(move || match finalize(&spool_path, &target, fps, transcode) {
                Ok(path) => info!("🎞️ 事件片段已保存: {}", path.display()),
                Err(e) => error!("❌ 事件片段保存失败: {:#}", e),
            })
            .context("failed to spawn transcode thread")?;

        let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.target
    }

    fn frames(&self) -> u64 {
        self.spool.frames()
    }
}

/// MP4 片段工厂; drop 时等待未完成的转码
pub struct Mp4Opener {
    quality: u8,
    fps: Box<dyn Fn() -> f64 + Send>,
    transcode: Transcoder,
    pending: Pending,
}

impl Mp4Opener {
    /// `fps` 在每个片段打开时读取 (视频源打开后才知道真实帧率)
    pub fn new(quality: u8, fps: impl Fn() -> f64 + Send + 'static) -> Self {
        Self {
            quality,
            fps: Box::new(fps),
            transcode: transcode_mjpeg_to_mp4,
            pending: Arc::default(),
        }
    }

    #[cfg(test)]
    fn with_transcoder(mut self, transcode: Transcoder) -> Self {
        self.transcode = transcode;
        self
    }

    /// 等待所有后台转码结束
    pub fn wait(&self) {
        let handles: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        for h in handles {
            if h.join().is_err() {
                error!("❌ 转码线程异常退出");
            }
        }
    }
}

impl ClipOpener for Mp4Opener {
    fn open(&mut self, path: &Path) -> Result<Box<dyn ClipWriter>> {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid clip path {}", path.display()))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let spool = dir.join(SPOOL_DIR).join(name).with_extension("mjpeg");
        let writer = MjpegWriter::create(&spool, self.quality)?;
        Ok(Box::new(Mp4Writer {
            spool: Box::new(writer),
            target: path.to_path_buf(),
            fps: (self.fps)(),
            transcode: self.transcode,
            pending: self.pending.clone(),
        }))
    }

    fn extension(&self) -> &str {
        "mp4"
    }
}

impl Drop for Mp4Opener {
    fn drop(&mut self) {
        self.wait();
    }
}
