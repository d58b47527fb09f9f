// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// 所有摄像头共享一个引擎实例, 串行推理
/// - Engine:    检测+跟踪接口与共享句柄
/// - YOLO:      ONNX Runtime 检测器
/// - ByteTrack: 每路摄像头独立的跟踪器
pub mod bytetrack;
pub mod engine;
pub mod tracker;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use engine::{InferenceStats, SharedEngine, TrackingEngine};
pub use types::{BBox, Detection};
#[cfg(feature = "onnx")]
pub use yolo::{YoloDetector, YoloTrackingEngine};
