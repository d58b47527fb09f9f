// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 轨迹状态存储 + 停车确认 (滞回)
//! Per-camera track state store with MOVING / STOPPED_CONFIRMED hysteresis

use crate::config::TrackingConfig;
use crate::detection::types::{BBox, Detection};
use crate::TrackId;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotionState {
    Moving,
    StoppedConfirmed,
}

/// 单条轨迹记录
#[derive(Clone, Debug)]
pub struct TrackRecord {
    pub class_name: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub state: MotionState,
    history: VecDeque<(f32, f32)>,
    stopped_persistence: u32,
    movement_persistence: u32,
}

impl TrackRecord {
    fn new(detection: &Detection) -> Self {
        Self {
            class_name: detection.class_name.clone(),
            bbox: detection.bbox.clone(),
            confidence: detection.confidence,
            state: MotionState::Moving,
            history: VecDeque::new(),
            stopped_persistence: 0,
            movement_persistence: 0,
        }
    }

    /// 质心历史 (旧 → 新)
    pub fn history(&self) -> impl Iterator<Item = &(f32, f32)> + '_ {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// 最新质心
    pub fn last_centroid(&self) -> Option<(f32, f32)> {
        self.history.back().copied()
    }

    /// 最近 n 个质心 (旧 → 新)
    pub fn trail(&self, n: usize) -> Vec<(f32, f32)> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).copied().collect()
    }

    pub fn persistence(&self) -> (u32, u32) {
        (self.stopped_persistence, self.movement_persistence)
    }

    pub fn is_stopped(&self) -> bool {
        self.state == MotionState::StoppedConfirmed
    }

    /// 回看 `lookback` 帧的位移, 历史不足时为 None
    pub fn displacement(&self, lookback: usize) -> Option<f32> {
        let len = self.history.len();
        if lookback == 0 || len < lookback {
            return None;
        }
        let (x0, y0) = self.history[len - lookback];
        let (x1, y1) = self.history[len - 1];
        Some((x1 - x0).hypot(y1 - y0))
    }

    fn observe(&mut self, detection: &Detection, max_history: usize) {
        self.class_name.clone_from(&detection.class_name);
        self.bbox = detection.bbox.clone();
        self.confidence = detection.confidence;
        self.history.push_back(detection.centroid());
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }

    /// 滞回状态机: 对立条件清零计数, 转换时两个计数都清零
    fn step(&mut self, cfg: &TrackingConfig) {
        let Some(dist) = self.displacement(cfg.stop_frames_threshold) else {
            return;
        };

        if dist < cfg.stop_distance_threshold {
            self.movement_persistence = 0;
            if self.state == MotionState::Moving {
                self.stopped_persistence += 1;
                if self.stopped_persistence >= cfg.stop_confirm_frames {
                    self.state = MotionState::StoppedConfirmed;
                    self.stopped_persistence = 0;
                }
            }
        } else {
            self.stopped_persistence = 0;
            if self.state == MotionState::StoppedConfirmed {
                self.movement_persistence += 1;
                if self.movement_persistence >= cfg.move_confirm_frames {
                    self.state = MotionState::Moving;
                    self.movement_persistence = 0;
                }
            }
        }
    }
}

/// 单路摄像头的轨迹存储, 仅由处理线程访问
pub struct TrackStore {
    config: TrackingConfig,
    tracks: HashMap<TrackId, TrackRecord>,
}

impl TrackStore {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    /// 用本帧检测更新: 追加质心, 推进状态机, 删除本帧缺席的轨迹
    pub fn update(&mut self, detections: &[Detection]) {
        let mut present = HashSet::with_capacity(detections.len());
        for det in detections {
            let max_history = self.config.max_track_history;
            self.tracks
                .entry(det.track_id)
                .or_insert_with(|| TrackRecord::new(det))
                .observe(det, max_history);
            present.insert(det.track_id);
        }

        // 缺席即删除, 不保留状态
        self.tracks.retain(|id, _| present.contains(id));

        for track in self.tracks.values_mut() {
            track.step(&self.config);
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackRecord> {
        self.tracks.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TrackId, &TrackRecord)> + '_ {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// 已确认停车的车辆轨迹 (升序)
    ///
    /// 只取车辆类别. 静止的行人/锥桶/救援车同样会进入 StoppedConfirmed,
    /// 但不计入 `stopped_track_ids` 与 `vehicle_alert`
    pub fn stopped_vehicle_ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|(_, t)| t.is_stopped() && crate::detection::types::is_vehicle_class(&t.class_name))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
