// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 摄像头生命周期管理
//! Camera registry with idempotent start / stop

use super::camera::{CameraHandle, CameraInfo, CameraLifecycle, SourceHealth, Workers};
use super::queue::DropOldestQueue;
use super::worker::{run_capture, run_process, CaptureContext, ProcessContext};
use crate::analysis::CameraSnapshot;
use crate::config::Config;
use crate::detection::SharedEngine;
use crate::input::SourceFactory;
use crate::CameraId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("camera {0} not found")]
    UnknownCamera(CameraId),
    #[error("failed to spawn worker thread for camera {camera}: {source}")]
    Spawn {
        camera: CameraId,
        #[source]
        source: std::io::Error,
    },
}

/// 所有摄像头共享一个引擎, 每路两个线程
pub struct CameraManager {
    config: Arc<Config>,
    engine: SharedEngine,
    factory: Arc<dyn SourceFactory>,
    cameras: BTreeMap<CameraId, Arc<CameraHandle>>,
}

impl CameraManager {
    pub fn new(config: Arc<Config>, engine: SharedEngine, factory: Arc<dyn SourceFactory>) -> Self {
        let cameras = config
            .cameras
            .iter()
            .map(|cam| (cam.id, Arc::new(CameraHandle::new(cam.clone(), &config.stream))))
            .collect();
        Self {
            config,
            engine,
            factory,
            cameras,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn camera(&self, id: CameraId) -> Result<&Arc<CameraHandle>, ManagerError> {
        self.cameras.get(&id).ok_or(ManagerError::UnknownCamera(id))
    }

    pub fn cameras(&self) -> impl Iterator<Item = &Arc<CameraHandle>> + '_ {
        self.cameras.values()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn list(&self) -> Vec<CameraInfo> {
        self.cameras.values().map(|h| CameraInfo::from(h.as_ref())).collect()
    }

    /// 启动; 已在运行则返回 `Ok(false)`
    pub fn start(&self, id: CameraId) -> Result<bool, ManagerError> {
        let handle = self.camera(id)?;
        let mut control = handle.control.lock().unwrap_or_else(|e| e.into_inner());
        if control.is_some() {
            return Ok(false);
        }

        handle.set_lifecycle(CameraLifecycle::Starting);
        handle.set_health(SourceHealth::Unknown);
        handle.publish_snapshot(CameraSnapshot::default());
        self.engine.reset_camera(id);

        let stop = Arc::new(AtomicBool::new(false));
        let (queue, rx) = DropOldestQueue::new(self.config.stream.input_queue_depth);

        let capture = CaptureContext {
            handle: handle.clone(),
            factory: self.factory.clone(),
            config: self.config.clone(),
            queue,
            stop: stop.clone(),
        };
        let process = ProcessContext {
            handle: handle.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            rx,
            stop: stop.clone(),
        };

        let mut threads = Vec::with_capacity(2);
        let spawned = std::thread::Builder::new()
            .name(format!("cam{}-capture", id))
            .spawn(move || run_capture(capture))
            .and_then(|h| {
                threads.push(h);
                std::thread::Builder::new()
                    .name(format!("cam{}-process", id))
                    .spawn(move || run_process(process))
            });

        match spawned {
            Ok(h) => threads.push(h),
            Err(source) => {
                error!(camera = id, "❌ 工作线程创建失败: {}", source);
                stop.store(true, Ordering::Relaxed);
                for t in threads {
                    let _ = t.join();
                }
                handle.set_lifecycle(CameraLifecycle::Stopped);
                return Err(ManagerError::Spawn { camera: id, source });
            }
        }

        *control = Some(Workers { stop, threads });
        handle.set_lifecycle(CameraLifecycle::Running);
        info!(camera = id, "▶️ 摄像头已启动");
        Ok(true)
    }

    /// 停止并等待线程退出; 未运行则返回 `Ok(false)`
    pub fn stop(&self, id: CameraId) -> Result<bool, ManagerError> {
        let handle = self.camera(id)?;
        let mut control = handle.control.lock().unwrap_or_else(|e| e.into_inner());
        let Some(workers) = control.take() else {
            return Ok(false);
        };

        handle.set_lifecycle(CameraLifecycle::Stopping);
        workers.stop.store(true, Ordering::Relaxed);
        for t in workers.threads {
            let name = t.thread().name().unwrap_or("worker").to_string();
            if t.join().is_err() {
                error!(camera = id, "❌ 线程 {} 异常退出", name);
            }
        }
        handle.set_lifecycle(CameraLifecycle::Stopped);
        let viewers = handle.close_streams();
        info!(camera = id, viewers, "⏹️ 摄像头已停止");
        Ok(true)
    }

    /// 停止全部摄像头并断开所有观众 (含未运行摄像头上的订阅)
    pub fn stop_all(&self) {
        for (id, handle) in &self.cameras {
            // id 来自注册表, 不会出现未知摄像头
            let _ = self.stop(*id);
            handle.close_streams();
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::detection::engine::mock::{car, ScriptedEngine};
    use crate::input::source::mock::SyntheticFactory;
    use std::time::{Duration, Instant};

    fn config(dir: &std::path::Path) -> Arc<Config> {
        let mut cfg = Config::default();
        cfg.stream.width = 64;
        cfg.stream.height = 48;
        cfg.stream.low_width = 32;
        cfg.stream.low_height = 24;
        cfg.recording.incident_dir = dir.join("incidents");
        cfg.recording.output_dir = dir.join("out");
        cfg.recording.clip_format = crate::config::ClipFormat::Mjpeg;
        cfg.cameras = (1..=2)
            .map(|id| CameraConfig {
                id,
                source: format!("synthetic{}", id),
                name: None,
                fps: None,
            })
            .collect();
        Arc::new(cfg)
    }

    /// 跳过落后提示, 取出保留的帧
    fn newest(rx: &mut tokio::sync::broadcast::Receiver<bytes::Bytes>) -> bytes::Bytes {
        use tokio::sync::broadcast::error::TryRecvError;
        loop {
            match rx.try_recv() {
                Ok(frame) => return frame,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(e) => panic!("no frame: {:?}", e),
            }
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_start_stop_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(SyntheticFactory::default());
        let engine = SharedEngine::new(Box::new(ScriptedEngine::new(vec![car(1, 30.0, 30.0)])));
        let manager = CameraManager::new(config(dir.path()), engine, factory.clone());

        assert!(manager.start(1).unwrap());
        assert!(!manager.start(1).unwrap());
        let cam = manager.camera(1).unwrap().clone();
        assert_eq!(cam.lifecycle(), CameraLifecycle::Running);

        assert!(wait_until(|| cam.snapshot().seq > 3));
        assert_eq!(factory.open_count(), 1);
        assert_eq!(cam.snapshot().vehicle_count, 1);
        assert!(cam.stats().view().frames_processed > 0);
        assert_eq!(cam.health(), SourceHealth::Ok);

        assert!(manager.stop(1).unwrap());
        assert!(!manager.stop(1).unwrap());
        assert_eq!(cam.lifecycle(), CameraLifecycle::Stopped);

        // 会话录像已写入
        let session = dir.path().join("out/cam1_output.mjpeg");
        assert!(std::fs::metadata(session).unwrap().len() > 0);

        // 可再次启动
        assert!(manager.start(1).unwrap());
        assert!(wait_until(|| factory.open_count() == 2));
        manager.stop_all();
        assert_eq!(cam.lifecycle(), CameraLifecycle::Stopped);
    }

    #[test]
    fn test_stop_ends_viewer_streams() {
        use tokio::sync::broadcast::error::TryRecvError;

        let dir = tempfile::tempdir().unwrap();
        let engine = SharedEngine::new(Box::new(ScriptedEngine::new(vec![])));
        let manager = CameraManager::new(
            config(dir.path()),
            engine,
            Arc::new(SyntheticFactory::default()),
        );
        let cam = manager.camera(1).unwrap().clone();
        let mut viewer = cam.full_hub().subscribe();
        let mut idle_viewer = manager.camera(2).unwrap().low_hub().subscribe();

        manager.start(1).unwrap();
        assert!(wait_until(|| cam.stats().view().frames_published > 0));
        manager.stop(1).unwrap();
        assert_eq!(cam.full_hub().receiver_count(), 0);
        loop {
            match viewer.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(e) => {
                    assert_eq!(e, TryRecvError::Closed);
                    break;
                }
            }
        }

        // stop_all 也断开未运行摄像头上的观众
        manager.stop_all();
        assert_eq!(idle_viewer.try_recv(), Err(TryRecvError::Closed));

        // 重新启动后新观众照常收帧
        let mut again = cam.full_hub().subscribe();
        manager.start(1).unwrap();
        assert!(wait_until(|| !matches!(again.try_recv(), Err(TryRecvError::Empty))));
        manager.stop(1).unwrap();
    }

    #[test]
    fn test_unknown_camera() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SharedEngine::new(Box::new(ScriptedEngine::new(vec![])));
        let manager = CameraManager::new(
            config(dir.path()),
            engine,
            Arc::new(SyntheticFactory::default()),
        );
        assert!(matches!(manager.start(9), Err(ManagerError::UnknownCamera(9))));
        assert!(matches!(manager.stop(9), Err(ManagerError::UnknownCamera(9))));
        assert!(manager.camera(9).is_err());
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn test_source_failure_marks_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(SyntheticFactory::failing());
        let engine = SharedEngine::new(Box::new(ScriptedEngine::new(vec![])));
        let manager = CameraManager::new(config(dir.path()), engine, factory);

        manager.start(2).unwrap();
        let cam = manager.camera(2).unwrap().clone();
        assert!(wait_until(|| matches!(cam.health(), SourceHealth::Failed(_))));
        assert_eq!(cam.status(), crate::analysis::CameraStatus::Degraded);
        assert_eq!(cam.stats().view().frames_processed, 0);

        // 停止在一个轮询周期内完成
        let start = Instant::now();
        manager.stop(2).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_inference_failure_skips_frame() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![car(1, 30.0, 30.0)]);
        let fail_next = engine.fail_next.clone();
        fail_next.store(true, Ordering::SeqCst);
        let manager = CameraManager::new(
            config(dir.path()),
            SharedEngine::new(Box::new(engine)),
            Arc::new(SyntheticFactory::default()),
        );

        manager.start(1).unwrap();
        let cam = manager.camera(1).unwrap().clone();
        assert!(wait_until(|| cam.stats().view().frames_processed > 2));
        manager.stop(1).unwrap();

        let stats = cam.stats().view();
        assert_eq!(stats.inference_failures, 1);
        assert_eq!(manager.engine().stats().failures, 1);
    }

    #[test]
    fn test_two_cameras_share_engine_serially() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine::new(vec![car(1, 30.0, 30.0)]);
        engine.work = Duration::from_millis(2);
        let overlap = engine.overlap_seen.clone();
        let intervals = engine.intervals.clone();
        let manager = CameraManager::new(
            config(dir.path()),
            SharedEngine::new(Box::new(engine)),
            Arc::new(SyntheticFactory::default()),
        );

        manager.start(1).unwrap();
        manager.start(2).unwrap();
        let (a, b) = (
            manager.camera(1).unwrap().clone(),
            manager.camera(2).unwrap().clone(),
        );
        assert!(wait_until(|| {
            a.stats().view().frames_processed > 10 && b.stats().view().frames_processed > 10
        }));
        manager.stop_all();

        assert!(!overlap.load(Ordering::SeqCst));
        let mut spans = intervals.lock().unwrap().clone();
        spans.sort_by_key(|(s, _)| *s);
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn test_low_stream_only_when_subscribed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SharedEngine::new(Box::new(ScriptedEngine::new(vec![])));
        let manager = CameraManager::new(
            config(dir.path()),
            engine,
            Arc::new(SyntheticFactory::default()),
        );
        let cam = manager.camera(1).unwrap().clone();
        let mut low = cam.low_hub().subscribe();
        let mut full = cam.full_hub().subscribe();

        manager.start(1).unwrap();
        assert!(wait_until(|| cam.stats().view().frames_published > 3));
        manager.stop(1).unwrap();

        let jpeg = newest(&mut full);
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
        let jpeg = newest(&mut low);
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
    }
}
