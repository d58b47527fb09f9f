// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 每路摄像头处理流水线 (Per-camera Pipeline)
///
/// 每路两个线程, 所有摄像头共享一个检测引擎:
/// - capture: 视频源 → 丢旧队列
/// - process: 检测跟踪 → 事件确认 → 标注 → 录像 / 编码 / 广播
pub mod camera;
pub mod codec;
pub mod hub;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod worker;

pub use camera::{CameraHandle, CameraInfo, CameraLifecycle, PipelineStats, SourceHealth};
pub use hub::{EncodedFrame, FrameHub};
pub use manager::{CameraManager, ManagerError};
pub use processor::{CameraProcessor, ProcessOutput};
pub use queue::DropOldestQueue;
