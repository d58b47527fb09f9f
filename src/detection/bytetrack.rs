// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型,无需外观特征

use super::tracker::{compute_iou, KalmanBoxFilter};
use super::types::BBox;
use crate::TrackId;

/// 单条轨迹
#[derive(Clone, Debug)]
struct STrack {
    id: TrackId,
    kalman: KalmanBoxFilter,
    /// 最近一次匹配的检测 (类别/置信度取最新)
    last_detection: BBox,
    frames_lost: u32,
}

impl STrack {
    fn new(id: TrackId, detection: BBox) -> Self {
        // 观测噪声较小, 更信任检测结果
        let kalman = KalmanBoxFilter::new(&detection, 0.1, 0.5);
        Self {
            id,
            kalman,
            last_detection: detection,
            frames_lost: 0,
        }
    }

    fn update(&mut self, detection: BBox) {
        self.kalman.update(&detection);
        self.last_detection = detection;
        self.frames_lost = 0;
    }

    /// 输出框: 卡尔曼平滑后的位置 + 检测的类别和置信度
    fn output(&self) -> BBox {
        BBox {
            confidence: self.last_detection.confidence,
            class_id: self.last_detection.class_id,
            ..self.kalman.state_bbox()
        }
    }
}

/// ByteTrack 参数
#[derive(Clone, Debug)]
pub struct ByteTrackConfig {
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
    /// 高分检测阈值 (同时是新建轨迹阈值)
    pub high_score_threshold: f32,
    /// 低分检测阈值 (用于救援)
    pub low_score_threshold: f32,
    pub high_iou_threshold: f32,
    pub low_iou_threshold: f32,
}

impl Default for ByteTrackConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.5,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
        }
    }
}

/// ByteTrack 追踪器 (每路摄像头一个实例)
pub struct ByteTracker {
    tracks: Vec<STrack>,
    next_id: TrackId,
    config: ByteTrackConfig,
}

impl ByteTracker {
    pub fn new(config: ByteTrackConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
        }
    }

    /// 更新跟踪 (ByteTrack 三步匹配)
    ///
    /// 返回本帧匹配到检测的轨迹 `(id, box)`; 丢失中的轨迹不输出
    pub fn update(&mut self, detections: &[BBox]) -> Vec<(TrackId, BBox)> {
        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.kalman.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets = Vec::new();
        let mut low_dets = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.config.high_score_threshold {
                high_dets.push(idx);
            } else if det.confidence >= self.config.low_score_threshold {
                low_dets.push(idx);
            }
        }

        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        for (det_idx, track_idx) in self.greedy_match(
            detections,
            &high_dets,
            &all_tracks,
            self.config.high_iou_threshold,
        ) {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(detections[det_idx].clone());
        }

        // 4. 第二轮: 低分检测 + 未匹配轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        for (det_idx, track_idx) in self.greedy_match(
            detections,
            &low_dets,
            &unmatched_tracks,
            self.config.low_iou_threshold,
        ) {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(detections[det_idx].clone());
        }

        // 5. 未匹配轨迹 → 丢失计数
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].frames_lost += 1;
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for &det_idx in &high_dets {
            if !matched_det[det_idx] {
                self.tracks
                    .push(STrack::new(self.next_id, detections[det_idx].clone()));
                self.next_id = self.next_id.wrapping_add(1).max(1);
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        self.tracks
            .iter()
            .filter(|t| t.frames_lost == 0)
            .map(|t| (t.id, t.output()))
            .collect()
    }

    /// IOU 贪心匹配, 返回 (检测索引, 轨迹索引)
    fn greedy_match(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            for &track_idx in track_indices {
                let predicted = self.tracks[track_idx].kalman.state_bbox();
                let iou = compute_iou(&detections[det_idx], &predicted);
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, det_idx, track_idx));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                used_det[det_idx] = true;
                used_track[track_idx] = true;
                assignments.push((det_idx, track_idx));
            }
        }
        assignments
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 清除所有轨迹 (源重开时调用)
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(ByteTrackConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, conf: f32, class_id: u32) -> BBox {
        BBox {
            x1: x,
            y1: y,
            x2: x + 60.0,
            y2: y + 40.0,
            confidence: conf,
            class_id,
        }
    }

    #[test]
    fn test_ids_stable_for_moving_box() {
        let mut tracker = ByteTracker::default();
        let first = tracker.update(&[det(100.0, 100.0, 0.9, 0)]);
        assert_eq!(first.len(), 1);
        let id = first[0].0;

        for i in 1..20 {
            let out = tracker.update(&[det(100.0 + i as f32 * 4.0, 100.0, 0.9, 0)]);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].0, id);
        }
    }

    #[test]
    fn test_two_objects_get_distinct_ids() {
        let mut tracker = ByteTracker::default();
        let out = tracker.update(&[det(0.0, 0.0, 0.9, 0), det(400.0, 300.0, 0.8, 7)]);
        assert_eq!(out.len(), 2);
        assert_ne!(out[0].0, out[1].0);
        let classes: Vec<u32> = out.iter().map(|(_, b)| b.class_id).collect();
        assert!(classes.contains(&7));
    }

    #[test]
    fn test_low_score_rescues_existing_track() {
        let mut tracker = ByteTracker::default();
        let id = tracker.update(&[det(50.0, 50.0, 0.9, 0)])[0].0;
        // 低分检测不新建轨迹, 但能救援已有轨迹
        let out = tracker.update(&[det(52.0, 50.0, 0.2, 0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, id);

        let mut fresh = ByteTracker::default();
        assert!(fresh.update(&[det(52.0, 50.0, 0.2, 0)]).is_empty());
    }

    #[test]
    fn test_lost_track_removed_after_buffer() {
        let mut tracker = ByteTracker::new(ByteTrackConfig {
            max_lost_frames: 3,
            ..Default::default()
        });
        tracker.update(&[det(10.0, 10.0, 0.9, 0)]);
        for _ in 0..3 {
            assert!(tracker.update(&[]).is_empty());
            assert_eq!(tracker.track_count(), 1);
        }
        tracker.update(&[]);
        assert_eq!(tracker.track_count(), 0);
    }

    #[test]
    fn test_ids_stable_under_jitter() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut tracker = ByteTracker::default();
        let first = tracker.update(&[det(100.0, 100.0, 0.9, 0), det(500.0, 300.0, 0.9, 2)]);
        let id_of = |class_id: u32| {
            first
                .iter()
                .find(|(_, b)| b.class_id == class_id)
                .map(|(id, _)| *id)
                .unwrap()
        };
        let (car_id, truck_id) = (id_of(0), id_of(2));

        for i in 0..50 {
            let j: [f32; 4] = std::array::from_fn(|_| rng.gen_range(-2.0..2.0));
            let c: [f32; 2] = std::array::from_fn(|_| rng.gen_range(0.55..0.95));
            let frame = [
                det(100.0 + i as f32 * 2.0 + j[0], 100.0 + j[1], c[0], 0),
                det(500.0 + j[2], 300.0 + j[3], c[1], 2),
            ];
            let out = tracker.update(&frame);
            assert_eq!(out.len(), 2);
            for (id, bbox) in out {
                let expected = if bbox.class_id == 0 { car_id } else { truck_id };
                assert_eq!(id, expected);
            }
        }
        assert_eq!(tracker.track_count(), 2);
    }
}
