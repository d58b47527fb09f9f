// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 单路摄像头的逐帧分析
//! Per-camera processor: track store → event confirmation → annotation → snapshot

use crate::analysis::{CameraSnapshot, ClassDebouncer, TrackStore};
use crate::config::Config;
use crate::detection::types::{Detection, ASSISTANCE_CLASS, CONE_CLASS};
use crate::input::Frame;
use crate::renderer::Annotator;
use image::RgbImage;
use std::time::SystemTime;

/// 单帧处理结果
pub struct ProcessOutput {
    pub annotated: RgbImage,
    pub snapshot: CameraSnapshot,
    /// 本帧是否满足事件录像条件
    pub incident: bool,
}

/// 处理线程独占, 不需要加锁
pub struct CameraProcessor {
    tracks: TrackStore,
    cones: ClassDebouncer,
    assistance: ClassDebouncer,
    annotator: Annotator,
    road_height: u32,
    last_cones_seen: Option<SystemTime>,
    last_assistance_seen: Option<SystemTime>,
}

impl CameraProcessor {
    pub fn new(config: &Config) -> Self {
        Self::with_annotator(config, Annotator::new(&config.render, &config.tracking))
    }

    pub fn with_annotator(config: &Config, annotator: Annotator) -> Self {
        let tracking = &config.tracking;
        Self {
            tracks: TrackStore::new(tracking.clone()),
            cones: ClassDebouncer::new(CONE_CLASS, tracking.cones_confirm_frames),
            assistance: ClassDebouncer::new(ASSISTANCE_CLASS, tracking.assist_confirm_frames),
            annotator,
            road_height: config.stream.height,
            last_cones_seen: None,
            last_assistance_seen: None,
        }
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn process(&mut self, frame: &Frame, detections: &[Detection], now: SystemTime) -> ProcessOutput {
        self.tracks.update(detections);

        // 每帧只计一次, 与检测个数无关
        let classes = || detections.iter().map(|d| d.class_name.as_str());
        let cones_confirmed = self.cones.observe_classes(classes());
        let assistance_confirmed = self.assistance.observe_classes(classes());
        if cones_confirmed {
            self.last_cones_seen = Some(now);
        }
        if assistance_confirmed {
            self.last_assistance_seen = Some(now);
        }

        let stopped = self.tracks.stopped_vehicle_ids();
        let suppressed = cones_confirmed || assistance_confirmed;
        let incident = !stopped.is_empty() || suppressed;

        let annotated = self
            .annotator
            .annotate(&frame.image, detections, &self.tracks, suppressed);

        let snapshot = CameraSnapshot {
            seq: frame.seq,
            updated_at: Some(now),
            vehicle_count: detections.iter().filter(|d| d.is_vehicle()).count(),
            stopped_track_ids: stopped,
            pedestrians_on_roadway: self.pedestrians_on_roadway(),
            cones_confirmed,
            assistance_confirmed,
            last_cones_seen: self.last_cones_seen,
            last_assistance_seen: self.last_assistance_seen,
            incident_recording: false,
        };

        ProcessOutput {
            annotated,
            snapshot,
            incident,
        }
    }

    /// 最新位置落在画面下半部 (车道区域) 的轨迹数
    ///
    /// 不区分类别, 任何轨迹进入车道区域都计入
    fn pedestrians_on_roadway(&self) -> usize {
        let start = (self.road_height / 2) as f32;
        let end = self.road_height as f32;
        self.tracks
            .iter()
            .filter_map(|(_, t)| t.last_centroid())
            .filter(|&(_, y)| y >= start && y <= end)
            .count()
    }

    /// 摄像头重启时清空
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.cones.reset();
        self.assistance.reset();
        self.last_cones_seen = None;
        self.last_assistance_seen = None;
    }
}
