// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod analysis; // 事件确认与状态推导
pub mod config; // 服务配置参数
pub mod detection; // 检测与跟踪引擎
pub mod input; // 视频输入系统
pub mod pipeline; // 每路摄像头处理流水线
pub mod recording; // 事件录像与录像库
pub mod renderer; // 帧标注
pub mod server; // HTTP 接口

pub use crate::config::{Args, CameraConfig, Config};
pub use crate::detection::{Detection, SharedEngine, TrackingEngine};
pub use crate::pipeline::CameraManager;

/// 摄像头编号
pub type CameraId = u32;

/// 跟踪ID (仅在单路摄像头内唯一)
pub type TrackId = u32;

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%3f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_time_string_shape() {
        let s = gen_time_string("");
        // YYYYmmddHHMMSS + 毫秒
        assert_eq!(s.len(), 17);
        assert!(s.chars().all(|c| c.is_ascii_digit()));

        let s = gen_time_string("-");
        assert_eq!(s.matches('-').count(), 6);
    }
}
