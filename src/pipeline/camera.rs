// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 单路摄像头运行时句柄 (生命周期 / 快照 / 统计 / 广播)

use super::hub::FrameHub;
use crate::analysis::{CameraSnapshot, CameraStatus};
use crate::config::{CameraConfig, StreamConfig};
use crate::CameraId;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraLifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl CameraLifecycle {
    fn as_u8(self) -> u8 {
        match self {
            CameraLifecycle::Stopped => 0,
            CameraLifecycle::Starting => 1,
            CameraLifecycle::Running => 2,
            CameraLifecycle::Stopping => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CameraLifecycle::Starting,
            2 => CameraLifecycle::Running,
            3 => CameraLifecycle::Stopping,
            _ => CameraLifecycle::Stopped,
        }
    }
}

/// 视频源健康状态 (采集线程更新)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SourceHealth {
    Unknown,
    Ok,
    Failed(String),
}

/// 流水线计数器
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_processed: AtomicU64,
    pub inference_failures: AtomicU64,
    pub recording_errors: AtomicU64,
    pub frames_published: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStatsView {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub inference_failures: u64,
    pub recording_errors: u64,
    pub frames_published: u64,
}

impl PipelineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn view(&self) -> PipelineStatsView {
        PipelineStatsView {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            recording_errors: self.recording_errors.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
        }
    }
}

/// 运行中的线程与停止标志
pub(crate) struct Workers {
    pub stop: Arc<AtomicBool>,
    pub threads: Vec<JoinHandle<()>>,
}

/// 摄像头句柄: 服务运行期间一直存在
pub struct CameraHandle {
    config: CameraConfig,
    phase: AtomicU8,
    /// 启停互斥 (持有期间 phase 处于 Starting/Stopping)
    pub(crate) control: Mutex<Option<Workers>>,
    snapshot: RwLock<Arc<CameraSnapshot>>,
    accident: AtomicBool,
    health: Mutex<SourceHealth>,
    stats: PipelineStats,
    /// 视频源帧率 (f64 位模式, 0 表示未知)
    source_fps: AtomicU64,
    full_hub: FrameHub,
    low_hub: FrameHub,
}

impl CameraHandle {
    pub fn new(config: CameraConfig, stream: &StreamConfig) -> Self {
        Self {
            config,
            phase: AtomicU8::new(CameraLifecycle::Stopped.as_u8()),
            control: Mutex::new(None),
            snapshot: RwLock::new(Arc::new(CameraSnapshot::default())),
            accident: AtomicBool::new(false),
            health: Mutex::new(SourceHealth::Unknown),
            stats: PipelineStats::default(),
            source_fps: AtomicU64::new(0),
            full_hub: FrameHub::new(stream.output_queue_depth),
            low_hub: FrameHub::new(stream.output_queue_depth),
        }
    }

    pub fn id(&self) -> CameraId {
        self.config.id
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> CameraLifecycle {
        CameraLifecycle::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_lifecycle(&self, state: CameraLifecycle) {
        self.phase.store(state.as_u8(), Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == CameraLifecycle::Running
    }

    // ========== 快照 ==========

    pub fn snapshot(&self) -> Arc<CameraSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 整体替换, 读者不会看到半更新的状态
    pub fn publish_snapshot(&self, snapshot: CameraSnapshot) {
        let next = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    // ========== 事故标志 (外部设置) ==========

    pub fn accident(&self) -> bool {
        self.accident.load(Ordering::Relaxed)
    }

    pub fn set_accident(&self, active: bool) {
        self.accident.store(active, Ordering::Relaxed);
    }

    // ========== 健康 / 统计 ==========

    pub fn health(&self) -> SourceHealth {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_health(&self, health: SourceHealth) {
        *self.health.lock().unwrap_or_else(|e| e.into_inner()) = health;
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// 对外状态
    pub fn status(&self) -> CameraStatus {
        match self.lifecycle() {
            CameraLifecycle::Running | CameraLifecycle::Starting => match self.health() {
                SourceHealth::Failed(_) => CameraStatus::Degraded,
                _ => CameraStatus::Online,
            },
            CameraLifecycle::Stopped | CameraLifecycle::Stopping => CameraStatus::Offline,
        }
    }

    pub(crate) fn set_source_fps(&self, fps: f64) {
        let bits = if fps.is_finite() && fps > 0.0 { fps.to_bits() } else { 0 };
        self.source_fps.store(bits, Ordering::Relaxed);
    }

    /// 当前视频源的帧率, 源未打开时为 `None`
    pub fn source_fps(&self) -> Option<f64> {
        match self.source_fps.load(Ordering::Relaxed) {
            0 => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    // ========== 广播 ==========

    pub fn full_hub(&self) -> &FrameHub {
        &self.full_hub
    }

    pub fn low_hub(&self) -> &FrameHub {
        &self.low_hub
    }

    /// 结束所有观众的 MJPEG 流, 返回被断开的观众数
    pub fn close_streams(&self) -> usize {
        self.full_hub.close() + self.low_hub.close()
    }
}

/// `/cameras` 列表项
#[derive(Debug, Clone, Serialize)]
pub struct CameraInfo {
    pub id: CameraId,
    pub name: Option<String>,
    pub source: String,
    pub lifecycle: CameraLifecycle,
    pub status: CameraStatus,
    pub health: SourceHealth,
    pub viewers: usize,
    pub stats: PipelineStatsView,
}

impl From<&CameraHandle> for CameraInfo {
    fn from(handle: &CameraHandle) -> Self {
        Self {
            id: handle.id(),
            name: handle.config.name.clone(),
            source: handle.config.source.clone(),
            lifecycle: handle.lifecycle(),
            status: handle.status(),
            health: handle.health(),
            viewers: handle.full_hub.receiver_count() + handle.low_hub.receiver_count(),
            stats: handle.stats.view(),
        }
    }
}
