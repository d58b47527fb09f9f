// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 事件分析 (Event Analysis)
///
/// - TrackStore:     轨迹历史 + 停车滞回确认
/// - ClassDebouncer: 锥桶/救援按帧去抖
/// - Status:         快照与对外状态推导
pub mod debounce;
pub mod status;
pub mod track_state;

pub use debounce::ClassDebouncer;
pub use status::{derive_status, CameraSnapshot, CameraStatus, CongestionLevel, StatusView};
pub use track_state::{MotionState, TrackRecord, TrackStore};
