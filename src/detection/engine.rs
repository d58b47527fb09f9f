// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测/跟踪引擎接口
//! Detection + tracking engine, shared by all cameras with one inference at a time

use super::types::Detection;
use crate::input::Frame;
use crate::CameraId;
use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 给定一帧, 返回带持久跟踪ID的检测结果
///
/// 跟踪ID只在同一路摄像头内保持一致
pub trait TrackingEngine: Send {
    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// 清除某路摄像头的跟踪记忆 (摄像头重启时调用)
    fn reset_camera(&mut self, _camera: CameraId) {}

    fn name(&self) -> &str;
}

#[derive(Default)]
struct InferenceCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    busy_micros: AtomicU64,
    last_micros: AtomicU64,
}

/// 推理统计快照
#[derive(Debug, Clone, Serialize)]
pub struct InferenceStats {
    pub engine: String,
    pub calls: u64,
    pub failures: u64,
    /// 累计持锁时间
    pub busy_ms: f64,
    pub last_latency_ms: f64,
    /// 所有摄像头合计的理论上限
    pub max_total_fps: f64,
}

/// 共享引擎: 全局互斥, 同一时刻只有一次推理
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Box<dyn TrackingEngine>>>,
    counters: Arc<InferenceCounters>,
    name: Arc<str>,
}

impl SharedEngine {
    pub fn new(engine: Box<dyn TrackingEngine>) -> Self {
        let name: Arc<str> = Arc::from(engine.name());
        Self {
            inner: Arc::new(Mutex::new(engine)),
            counters: Arc::new(InferenceCounters::default()),
            name,
        }
    }

    /// 串行推理
    pub fn track(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut engine = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = Instant::now();
        let result = engine.track(frame);
        let elapsed = start.elapsed();
        drop(engine);

        self.record(elapsed, result.is_ok());
        result
    }

    pub fn reset_camera(&self, camera: CameraId) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset_camera(camera);
    }

    fn record(&self, elapsed: Duration, ok: bool) {
        let micros = elapsed.as_micros() as u64;
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters.busy_micros.fetch_add(micros, Ordering::Relaxed);
        self.counters.last_micros.store(micros, Ordering::Relaxed);
        if !ok {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> InferenceStats {
        let calls = self.counters.calls.load(Ordering::Relaxed);
        let busy = self.counters.busy_micros.load(Ordering::Relaxed);
        let last = self.counters.last_micros.load(Ordering::Relaxed);
        let avg_micros = if calls > 0 { busy as f64 / calls as f64 } else { 0.0 };
        InferenceStats {
            engine: self.name.to_string(),
            calls,
            failures: self.counters.failures.load(Ordering::Relaxed),
            busy_ms: busy as f64 / 1000.0,
            last_latency_ms: last as f64 / 1000.0,
            max_total_fps: if avg_micros > 0.0 { 1e6 / avg_micros } else { 0.0 },
        }
    }
}

/// 测试用脚本引擎
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::detection::types::BBox;
    use std::sync::atomic::AtomicBool;

    /// 每帧返回同一组检测, 可注入失败并记录持锁区间
    pub struct ScriptedEngine {
        pub detections: Arc<Mutex<Vec<Detection>>>,
        pub fail_next: Arc<AtomicBool>,
        pub intervals: Arc<Mutex<Vec<(Instant, Instant)>>>,
        pub busy: Arc<AtomicBool>,
        pub overlap_seen: Arc<AtomicBool>,
        pub work: Duration,
    }

    impl ScriptedEngine {
        pub fn new(detections: Vec<Detection>) -> Self {
            Self {
                detections: Arc::new(Mutex::new(detections)),
                fail_next: Arc::new(AtomicBool::new(false)),
                intervals: Arc::new(Mutex::new(Vec::new())),
                busy: Arc::new(AtomicBool::new(false)),
                overlap_seen: Arc::new(AtomicBool::new(false)),
                work: Duration::ZERO,
            }
        }
    }

    impl TrackingEngine for ScriptedEngine {
        fn track(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlap_seen.store(true, Ordering::SeqCst);
            }
            let start = Instant::now();
            if !self.work.is_zero() {
                std::thread::sleep(self.work);
            }
            let result = if self.fail_next.swap(false, Ordering::SeqCst) {
                Err(anyhow::anyhow!("scripted failure"))
            } else {
                Ok(self.detections.lock().unwrap().clone())
            };
            self.intervals.lock().unwrap().push((start, Instant::now()));
            self.busy.store(false, Ordering::SeqCst);
            result
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub fn car(track_id: u32, x: f32, y: f32) -> Detection {
        Detection::new(
            "car",
            BBox {
                x1: x - 20.0,
                y1: y - 10.0,
                x2: x + 20.0,
                y2: y + 10.0,
                confidence: 0.9,
                class_id: 0,
            },
            track_id,
        )
    }

    pub fn object(class_name: &str, track_id: u32, x: f32, y: f32) -> Detection {
        Detection {
            class_name: class_name.to_string(),
            ..car(track_id, x, y)
        }
    }
}
