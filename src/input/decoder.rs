// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// FFmpeg 视频源 (文件循环播放 / RTSP 拉流)
/// FFmpeg-backed frame source
use super::decode_filter::DecodeFilter;
use super::source::{is_stream_locator, FrameSource, ReadOutcome, SourceFactory};
use crate::config::CameraConfig;
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 等待 FFmpeg 任务启动的上限
const START_TIMEOUT: Duration = Duration::from_secs(15);

/// 容器帧率的合理上限, 超出视为元数据错误
const MAX_CONTAINER_FPS: f64 = 240.0;

/// 读取容器中视频流的平均帧率
pub fn container_fps(locator: &str) -> Option<f64> {
    match find_video_stream_info(locator) {
        Ok(Some(StreamInfo::Video { fps, .. })) => sane_fps(fps),
        Ok(_) => None,
        Err(e) => {
            warn!("⚠️ 无法读取帧率 {}: {}", locator, e);
            None
        }
    }
}

fn sane_fps(fps: f64) -> Option<f64> {
    (fps.is_finite() && fps > 0.0 && fps <= MAX_CONTAINER_FPS).then_some(fps)
}

/// 配置优先, 其次容器帧率, 最后默认值
pub fn resolve_fps(configured: Option<f64>, detected: Option<f64>, default_fps: f64) -> f64 {
    configured.or(detected).unwrap_or(default_fps)
}

/// 单次解码任务
struct DecodeJob {
    rx: Receiver<RgbImage>,
    abort: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl Drop for DecodeJob {
    fn drop(&mut self) {
        // 解码线程在下一帧检查标志后退出
        self.abort.store(true, Ordering::Relaxed);
    }
}

pub struct FfmpegSource {
    locator: String,
    width: u32,
    height: u32,
    fps: f64,
    live: bool,
    job: Option<DecodeJob>,
}

impl FfmpegSource {
    pub fn open(locator: &str, width: u32, height: u32, fps: f64) -> Result<Self> {
        let mut source = Self {
            locator: locator.to_string(),
            width,
            height,
            fps,
            live: is_stream_locator(locator),
            job: None,
        };
        source.job = Some(source.spawn_job()?);
        info!("📹 视频源已打开: {} ({}x{} @ {:.1}fps)", locator, width, height, fps);
        Ok(source)
    }

    fn spawn_job(&self) -> Result<DecodeJob> {
        let (tx, rx) = bounded(2);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let abort = Arc::new(AtomicBool::new(false));

        let filter = DecodeFilter::new(tx, abort.clone(), self.live, self.locator.clone());
        let locator = self.locator.clone();
        let live = self.live;
        let scale = format!("scale={}:{},format=yuv420p", self.width, self.height);

        let handle = std::thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("decode", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let mut input = Input::new(locator.as_str());
                if live {
                    input = input.set_input_opts(
                        [("rtsp_transport", "tcp"), ("rtsp_flags", "prefer_tcp")].into(),
                    );
                }

                let ctx = match FfmpegContext::builder()
                    .input(input)
                    .filter_descs([scale.as_str()].into())
                    .output(out)
                    .build()
                {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("构建失败: {}", e)));
                        return;
                    }
                };

                match ctx.start() {
                    Ok(sch) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = sch.wait();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("启动失败: {}", e)));
                    }
                }
            })
            .context("failed to spawn decode thread")?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => Ok(DecodeJob {
                rx,
                abort,
                _handle: handle,
            }),
            Ok(Err(e)) => bail!("{}: {}", self.locator, e),
            Err(_) => {
                abort.store(true, Ordering::Relaxed);
                Err(anyhow!("{}: decoder did not start in {:?}", self.locator, START_TIMEOUT))
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self, timeout: Duration) -> Result<ReadOutcome> {
        let Some(job) = &self.job else {
            return Ok(ReadOutcome::EndOfStream);
        };
        match job.rx.recv_timeout(timeout) {
            Ok(image) => Ok(ReadOutcome::Frame(image)),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        debug!("🔁 重新打开视频源: {}", self.locator);
        self.job = None;
        self.job = Some(self.spawn_job()?);
        Ok(())
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

/// FFmpeg 视频源工厂
pub struct FfmpegSourceFactory {
    pub default_fps: f64,
}

impl SourceFactory for FfmpegSourceFactory {
    fn open(&self, camera: &CameraConfig, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
        // 实时流不节流, 不必额外连一次
        let detected = match camera.fps {
            None if !is_stream_locator(&camera.source) => container_fps(&camera.source),
            _ => None,
        };
        let fps = resolve_fps(camera.fps, detected, self.default_fps);
        let source = FfmpegSource::open(&camera.source, width, height, fps)
            .with_context(|| format!("camera {}", camera.id))?;
        Ok(Box::new(source))
    }
}
