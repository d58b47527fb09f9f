// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 摄像头状态快照与对外状态推导
//! Per-camera snapshot + status view derivation (wall-clock decay)

use crate::config::StatusConfig;
use crate::TrackId;
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// 处理线程每帧发布的不可变快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CameraSnapshot {
    pub seq: u64,
    #[serde(skip)]
    pub updated_at: Option<SystemTime>,
    pub vehicle_count: usize,
    pub stopped_track_ids: Vec<TrackId>,
    pub pedestrians_on_roadway: usize,
    /// 按帧去抖后的标志
    pub cones_confirmed: bool,
    pub assistance_confirmed: bool,
    #[serde(skip)]
    pub last_cones_seen: Option<SystemTime>,
    #[serde(skip)]
    pub last_assistance_seen: Option<SystemTime>,
    pub incident_recording: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
}

impl CongestionLevel {
    pub fn from_count(vehicles: usize, cfg: &StatusConfig) -> Self {
        if vehicles > cfg.congestion_high {
            CongestionLevel::High
        } else if vehicles > cfg.congestion_medium {
            CongestionLevel::Medium
        } else {
            CongestionLevel::Low
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            CongestionLevel::High => "#dc2626",
            CongestionLevel::Medium => "#facc15",
            CongestionLevel::Low => "#16a34a",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Online,
    Offline,
    Degraded,
}

/// `/camera/:id/status_full` 响应
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusView {
    pub status: CameraStatus,
    pub vehicle_count: usize,
    pub congestion_level: CongestionLevel,
    pub congestion_color: &'static str,
    pub stopped_count: usize,
    pub stopped_track_ids: Vec<TrackId>,
    pub pedestrians_on_roadway_count: usize,
    pub accident_flag: bool,
    pub assistance_active: bool,
    pub cones_active: bool,
    pub vehicle_alert: bool,
}

/// 最近 `timeout` 内是否出现过 (时钟回拨视为仍然有效)
fn seen_within(last: Option<SystemTime>, now: SystemTime, timeout: Duration) -> bool {
    match last {
        Some(t) => match now.duration_since(t) {
            Ok(elapsed) => elapsed < timeout,
            Err(_) => true,
        },
        None => false,
    }
}

/// 推导对外状态
///
/// 锥桶/救援按墙钟时间衰减, 与帧计数的内部标志相互独立
pub fn derive_status(
    snapshot: &CameraSnapshot,
    status: CameraStatus,
    accident: bool,
    cfg: &StatusConfig,
    now: SystemTime,
) -> StatusView {
    let timeout = cfg.timeout();
    let assistance_active = seen_within(snapshot.last_assistance_seen, now, timeout);
    let cones_active = seen_within(snapshot.last_cones_seen, now, timeout);
    let level = CongestionLevel::from_count(snapshot.vehicle_count, cfg);
    let stopped_count = snapshot.stopped_track_ids.len();

    StatusView {
        status,
        vehicle_count: snapshot.vehicle_count,
        congestion_level: level,
        congestion_color: level.color(),
        stopped_count,
        stopped_track_ids: snapshot.stopped_track_ids.clone(),
        pedestrians_on_roadway_count: snapshot.pedestrians_on_roadway,
        accident_flag: accident,
        assistance_active,
        cones_active,
        vehicle_alert: stopped_count > 0 && !assistance_active && !cones_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> StatusConfig {
        StatusConfig::default()
    }

    #[test]
    fn test_congestion_levels() {
        let c = cfg();
        assert_eq!(CongestionLevel::from_count(13, &c), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_count(14, &c), CongestionLevel::Medium);
        assert_eq!(CongestionLevel::from_count(18, &c), CongestionLevel::Medium);
        assert_eq!(CongestionLevel::from_count(19, &c), CongestionLevel::High);
        assert_eq!(CongestionLevel::High.color(), "#dc2626");
    }

    #[test]
    fn test_alert_requires_stopped_vehicle() {
        let now = SystemTime::now();
        let snap = CameraSnapshot::default();
        let view = derive_status(&snap, CameraStatus::Online, false, &cfg(), now);
        assert!(!view.vehicle_alert);

        let snap = CameraSnapshot {
            stopped_track_ids: vec![3, 9],
            ..Default::default()
        };
        let view = derive_status(&snap, CameraStatus::Online, false, &cfg(), now);
        assert!(view.vehicle_alert);
        assert_eq!(view.stopped_count, 2);
    }

    #[test]
    fn test_suppression_decays_by_wall_clock() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let snap = CameraSnapshot {
            stopped_track_ids: vec![1],
            last_cones_seen: Some(t0),
            ..Default::default()
        };

        // 4.9s 后仍抑制
        let view = derive_status(
            &snap,
            CameraStatus::Online,
            false,
            &cfg(),
            t0 + Duration::from_millis(4900),
        );
        assert!(view.cones_active);
        assert!(!view.vehicle_alert);

        // 5s 后恢复告警, 与期间处理了多少帧无关
        let view = derive_status(
            &snap,
            CameraStatus::Online,
            false,
            &cfg(),
            t0 + Duration::from_secs(5),
        );
        assert!(!view.cones_active);
        assert!(view.vehicle_alert);
    }

    #[test]
    fn test_assistance_suppresses_and_clock_skew() {
        let now = SystemTime::now();
        let snap = CameraSnapshot {
            stopped_track_ids: vec![1],
            last_assistance_seen: Some(now + Duration::from_secs(2)),
            ..Default::default()
        };
        let view = derive_status(&snap, CameraStatus::Degraded, true, &cfg(), now);
        assert!(view.assistance_active);
        assert!(!view.vehicle_alert);
        assert!(view.accident_flag);
        assert_eq!(view.status, CameraStatus::Degraded);
    }

    #[test]
    fn test_serialized_field_names() {
        let view = derive_status(
            &CameraSnapshot::default(),
            CameraStatus::Offline,
            false,
            &cfg(),
            SystemTime::now(),
        );
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "offline");
        assert_eq!(json["congestion_level"], "Low");
        assert_eq!(json["congestion_color"], "#16a34a");
        assert!(json.get("pedestrians_on_roadway_count").is_some());
        assert!(json.get("vehicle_alert").is_some());
    }
}
