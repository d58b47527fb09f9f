// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 采集线程与处理线程
//! capture: source → DropOldestQueue
//! process: queue → engine → processor → recorder / session / hubs / snapshot

use super::camera::{CameraHandle, PipelineStats, SourceHealth};
use super::codec::{encode_jpeg, Downscaler};
use super::processor::CameraProcessor;
use super::queue::{pop_timeout, DropOldestQueue};
use crate::config::Config;
use crate::detection::SharedEngine;
use crate::input::{Frame, ReadOutcome, SourceFactory};
use crate::recording::{
    clip_opener, ClipWriter, IncidentRecorder, MjpegWriter, RecorderEvent, RecorderState,
};
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// 阻塞等待上限, 停止标志在一个周期内生效
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const REWIND_BACKOFF: Duration = Duration::from_secs(1);

/// 分段睡眠, 停止时提前返回
fn sleep_unless_stopped(stop: &AtomicBool, mut remaining: Duration) {
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(POLL_TIMEOUT);
        std::thread::sleep(step);
        remaining -= step;
    }
}

/// 按名义帧率节流 (基于截止时间, 不累积误差)
struct Pacer {
    interval: Duration,
    deadline: Instant,
}

impl Pacer {
    fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Self {
            interval: Duration::from_secs_f64(1.0 / fps),
            deadline: Instant::now(),
        }
    }

    /// 返回需要等待的时间
    fn next(&mut self) -> Duration {
        self.deadline += self.interval;
        let now = Instant::now();
        if self.deadline > now {
            self.deadline - now
        } else {
            // 落后太多时重新对齐, 不追帧
            if now - self.deadline > self.interval * 2 {
                self.deadline = now;
            }
            Duration::ZERO
        }
    }
}

pub(crate) struct CaptureContext {
    pub handle: Arc<CameraHandle>,
    pub factory: Arc<dyn SourceFactory>,
    pub config: Arc<Config>,
    pub queue: DropOldestQueue<Frame>,
    pub stop: Arc<AtomicBool>,
}

pub(crate) fn run_capture(ctx: CaptureContext) {
    let id = ctx.handle.id();
    let stream = &ctx.config.stream;
    let stats = ctx.handle.stats();

    let mut source = match ctx
        .factory
        .open(ctx.handle.config(), stream.width, stream.height)
    {
        Ok(source) => source,
        Err(e) => {
            error!(camera = id, "❌ 视频源打开失败: {:#}", e);
            ctx.handle.set_health(SourceHealth::Failed(format!("{:#}", e)));
            // 不产生帧, 等待停止
            while !ctx.stop.load(Ordering::Relaxed) {
                std::thread::sleep(POLL_TIMEOUT);
            }
            return;
        }
    };
    ctx.handle.set_health(SourceHealth::Ok);
    ctx.handle.set_source_fps(source.fps());

    let pacing = stream.realtime_pacing && !source.is_live();
    let mut pacer = Pacer::new(source.fps());
    let mut seq: u64 = 0;
    let mut healthy = true;

    info!(camera = id, "🎥 采集线程启动 (pacing={})", pacing);

    while !ctx.stop.load(Ordering::Relaxed) {
        match source.read(POLL_TIMEOUT) {
            Ok(ReadOutcome::Frame(image)) => {
                if !healthy {
                    ctx.handle.set_health(SourceHealth::Ok);
                    healthy = true;
                }
                PipelineStats::incr(&stats.frames_captured);
                let dropped = ctx.queue.push(Frame {
                    camera: id,
                    seq,
                    captured_at: Instant::now(),
                    image,
                });
                PipelineStats::add(&stats.frames_dropped, dropped as u64);
                seq += 1;

                if pacing {
                    sleep_unless_stopped(&ctx.stop, pacer.next());
                }
            }
            Ok(ReadOutcome::Pending) => {}
            Ok(ReadOutcome::EndOfStream) => {
                debug!(camera = id, "🔁 视频结束, 从头播放");
                if let Err(e) = source.rewind() {
                    warn!(camera = id, "⚠️ 视频源重开失败: {:#}", e);
                    ctx.handle.set_health(SourceHealth::Failed(format!("{:#}", e)));
                    healthy = false;
                    sleep_unless_stopped(&ctx.stop, REWIND_BACKOFF);
                }
            }
            Err(e) => {
                warn!(camera = id, "⚠️ 读取帧失败: {:#}", e);
                ctx.handle.set_health(SourceHealth::Failed(format!("{:#}", e)));
                healthy = false;
                sleep_unless_stopped(&ctx.stop, POLL_TIMEOUT);
            }
        }
    }

    info!(camera = id, "🛑 采集线程退出 ({} 帧)", seq);
}

pub(crate) struct ProcessContext {
    pub handle: Arc<CameraHandle>,
    pub engine: SharedEngine,
    pub config: Arc<Config>,
    pub rx: Receiver<Frame>,
    pub stop: Arc<AtomicBool>,
}

/// 会话录像 `cam{id}_output.mjpeg` (每次启动截断)
fn open_session(ctx: &ProcessContext) -> Option<Box<dyn ClipWriter>> {
    let rec = &ctx.config.recording;
    if !rec.record_session {
        return None;
    }
    let path: PathBuf = rec
        .output_dir
        .join(format!("cam{}_output.mjpeg", ctx.handle.id()));
    match MjpegWriter::create(&path, ctx.config.stream.jpeg_quality) {
        Ok(writer) => {
            info!(camera = ctx.handle.id(), "💾 会话录像: {}", path.display());
            Some(Box::new(writer))
        }
        Err(e) => {
            warn!(camera = ctx.handle.id(), "⚠️ 会话录像创建失败: {:#}", e);
            PipelineStats::incr(&ctx.handle.stats().recording_errors);
            None
        }
    }
}

pub(crate) fn run_process(ctx: ProcessContext) {
    let id = ctx.handle.id();
    let config = &ctx.config;
    let stats = ctx.handle.stats();
    let fps = ctx.handle.config().fps.unwrap_or(config.stream.default_fps);

    let mut processor = CameraProcessor::new(config);
    let handle = ctx.handle.clone();
    let opener = clip_opener(
        config.recording.clip_format,
        config.stream.jpeg_quality,
        move || handle.source_fps().unwrap_or(fps),
    );
    let mut recorder = IncidentRecorder::new(
        id,
        &config.recording.incident_dir,
        config.recording.grace_frames,
        fps.round().max(1.0) as u32,
        opener,
    );
    let mut session = open_session(&ctx);
    let mut downscaler = Downscaler::new(config.stream.low_width, config.stream.low_height);

    // 每秒统计
    let mut last_report = Instant::now();
    let mut frames_since = 0u32;
    let mut latency_sum = Duration::ZERO;

    info!(camera = id, "🔍 处理线程启动");

    while !ctx.stop.load(Ordering::Relaxed) {
        let Some(frame) = pop_timeout(&ctx.rx, POLL_TIMEOUT) else {
            continue;
        };

        let detections = match ctx.engine.track(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                // 跳过本帧, 不触碰轨迹与事件状态
                warn!(camera = id, seq = frame.seq, "⚠️ 推理失败: {:#}", e);
                PipelineStats::incr(&stats.inference_failures);
                continue;
            }
        };

        let out = processor.process(&frame, &detections, SystemTime::now());
        let mut snapshot = out.snapshot;

        if recorder.on_frame(out.incident, &frame.image) == RecorderEvent::Failed {
            PipelineStats::incr(&stats.recording_errors);
        }
        snapshot.incident_recording = recorder.state() == RecorderState::Recording;

        match encode_jpeg(&out.annotated, config.stream.jpeg_quality) {
            Ok(encoded) => {
                if let Some(writer) = session.as_mut() {
                    if let Err(e) = writer.write_encoded(&encoded) {
                        error!(camera = id, "❌ 会话录像写入失败, 停止写入: {:#}", e);
                        PipelineStats::incr(&stats.recording_errors);
                        session = None;
                    }
                }
                ctx.handle.full_hub().publish(encoded);
                PipelineStats::incr(&stats.frames_published);
            }
            Err(e) => warn!(camera = id, "⚠️ JPEG 编码失败: {:#}", e),
        }

        // 低分辨率流只在有观众时编码
        if ctx.handle.low_hub().has_subscribers() {
            match downscaler.encode(&out.annotated, config.stream.low_jpeg_quality) {
                Ok(encoded) => {
                    ctx.handle.low_hub().publish(encoded);
                }
                Err(e) => debug!(camera = id, "低分辨率编码失败: {:#}", e),
            }
        }

        ctx.handle.publish_snapshot(snapshot);
        PipelineStats::incr(&stats.frames_processed);

        frames_since += 1;
        latency_sum += frame.captured_at.elapsed();
        let elapsed = last_report.elapsed();
        if elapsed >= Duration::from_secs(1) {
            debug!(
                camera = id,
                "📊 处理 {:.1} FPS | 端到端延迟 {:.1}ms | 轨迹 {} | 观众 {}",
                frames_since as f64 / elapsed.as_secs_f64(),
                latency_sum.as_secs_f64() * 1000.0 / frames_since as f64,
                processor.tracks().len(),
                ctx.handle.full_hub().receiver_count() + ctx.handle.low_hub().receiver_count(),
            );
            last_report = Instant::now();
            frames_since = 0;
            latency_sum = Duration::ZERO;
        }
    }

    recorder.close();
    if let Some(writer) = session.take() {
        if let Err(e) = writer.finish() {
            warn!(camera = id, "⚠️ 会话录像关闭失败: {:#}", e);
        }
    }
    info!(camera = id, "🛑 处理线程退出");
}
