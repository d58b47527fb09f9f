// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 服务配置参数
//! Service configuration (CLI + TOML)

use crate::CameraId;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 交通哨兵命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "交通哨兵 - 多路交通安全视频分析服务", long_about = None)]
pub struct Args {
    /// 配置文件 (TOML)
    #[arg(short, long, default_value = "config/sentinel.toml")]
    pub config: PathBuf,

    /// HTTP端口 (覆盖配置文件)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// 检测模型路径 (覆盖配置文件)
    #[arg(short, long)]
    pub model: Option<String>,

    /// 标注字体 TTF/OTF (覆盖配置文件)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 日志过滤 (覆盖 RUST_LOG)
    #[arg(long)]
    pub log: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ========== 配置结构 ==========

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub stream: StreamConfig,
    pub render: RenderConfig,
    pub recording: RecordingConfig,
    pub status: StatusConfig,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// 检测模型参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model: String,
    pub input_size: u32,
    pub min_confidence: f32,
    pub iou_threshold: f32,
    /// 模型输出类别名 (按类别索引)
    pub class_names: Vec<String>,
    /// 推理前四周补边像素
    pub inference_padding: u32,
    pub intra_threads: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model: "models/best.onnx".to_string(),
            input_size: 640,
            min_confidence: 0.4,
            iou_threshold: 0.45,
            class_names: [
                "car",
                "bus",
                "camion",
                "truck",
                "furgon",
                "moto",
                "persona",
                "cono",
                "asistencia",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            inference_padding: 20,
            intra_threads: 4,
        }
    }
}

/// 轨迹与事件确认阈值
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub max_track_history: usize,
    /// 位移比较的回看帧数
    pub stop_frames_threshold: usize,
    /// 像素
    pub stop_distance_threshold: f32,
    pub stop_confirm_frames: u32,
    pub move_confirm_frames: u32,
    pub cones_confirm_frames: u32,
    pub assist_confirm_frames: u32,
    pub max_trail: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_track_history: 30,
            stop_frames_threshold: 15,
            stop_distance_threshold: 10.0,
            stop_confirm_frames: 12,
            move_confirm_frames: 5,
            cones_confirm_frames: 10,
            assist_confirm_frames: 10,
            max_trail: 15,
        }
    }
}

/// 视频流参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub low_width: u32,
    pub low_height: u32,
    pub low_jpeg_quality: u8,
    pub input_queue_depth: usize,
    pub output_queue_depth: usize,
    /// 源无法提供帧率时的默认值
    pub default_fps: f64,
    /// 文件源按帧率节流
    pub realtime_pacing: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            jpeg_quality: 80,
            low_width: 640,
            low_height: 360,
            low_jpeg_quality: 45,
            input_queue_depth: 5,
            output_queue_depth: 2,
            default_fps: 30.0,
            realtime_pacing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub font_path: Option<PathBuf>,
    pub font_scale: f32,
    pub label_alpha: f32,
    pub line_thickness: u32,
}

/// 默认标注字体, 缺失时标签只画底色
pub const DEFAULT_FONT_PATH: &str = "assets/font/msyh.ttc";

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_path: Some(PathBuf::from(DEFAULT_FONT_PATH)),
            font_scale: 22.0,
            label_alpha: 0.6,
            line_thickness: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub incident_dir: PathBuf,
    pub output_dir: PathBuf,
    /// 事件消失后继续录制的帧数
    pub grace_frames: u32,
    /// 是否写出整段标注视频
    pub record_session: bool,
    /// 事件片段格式
    pub clip_format: ClipFormat,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            incident_dir: PathBuf::from("videos/incidentes"),
            output_dir: PathBuf::from("videos/generado"),
            grace_frames: 15,
            record_session: true,
            clip_format: ClipFormat::default(),
        }
    }
}

/// 事件片段容器: MP4 (H.264, 浏览器可直接播放) 需要 `ffmpeg` 特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipFormat {
    Mp4,
    Mjpeg,
}

impl Default for ClipFormat {
    fn default() -> Self {
        if cfg!(feature = "ffmpeg") {
            ClipFormat::Mp4
        } else {
            ClipFormat::Mjpeg
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    pub timeout_secs: u64,
    pub congestion_medium: usize,
    pub congestion_high: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            congestion_medium: 13,
            congestion_high: 18,
        }
    }
}

impl StatusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 单路摄像头
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    pub id: CameraId,
    /// 文件路径或流地址
    pub source: String,
    #[serde(default)]
    pub name: Option<String>,
    /// 覆盖源帧率
    #[serde(default)]
    pub fps: Option<f64>,
}

// ========== 加载与校验 ==========

impl Config {
    /// 从TOML文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 加载配置, 文件不存在时回退到默认值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("⚠️ 配置文件不存在: {}, 使用默认配置", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// 命令行参数覆盖
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(model) = &args.model {
            self.detection.model = model.clone();
        }
        if let Some(font) = &args.font {
            self.render.font_path = Some(font.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for cam in &self.cameras {
            if !seen.insert(cam.id) {
                return Err(ConfigError::Invalid(format!("duplicate camera id {}", cam.id)));
            }
            if cam.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("camera {} has empty source", cam.id)));
            }
        }

        let t = &self.tracking;
        if t.stop_frames_threshold == 0
            || t.stop_confirm_frames == 0
            || t.move_confirm_frames == 0
            || t.cones_confirm_frames == 0
            || t.assist_confirm_frames == 0
        {
            return Err(ConfigError::Invalid(
                "tracking thresholds must be greater than zero".to_string(),
            ));
        }
        if t.max_track_history < t.stop_frames_threshold {
            return Err(ConfigError::Invalid(format!(
                "max_track_history ({}) must be >= stop_frames_threshold ({})",
                t.max_track_history, t.stop_frames_threshold
            )));
        }

        let s = &self.stream;
        if s.width == 0 || s.height == 0 || s.low_width == 0 || s.low_height == 0 {
            return Err(ConfigError::Invalid("resolution must be non-zero".to_string()));
        }
        if s.input_queue_depth == 0 || s.output_queue_depth == 0 {
            return Err(ConfigError::Invalid("queue depth must be non-zero".to_string()));
        }
        if s.default_fps.is_nan() || s.default_fps <= 0.0 {
            return Err(ConfigError::Invalid("default_fps must be positive".to_string()));
        }
        if self.recording.clip_format == ClipFormat::Mp4 && !cfg!(feature = "ffmpeg") {
            return Err(ConfigError::Invalid(
                "clip_format = \"mp4\" requires the `ffmpeg` feature".to_string(),
            ));
        }
        if self.detection.class_names.is_empty() {
            return Err(ConfigError::Invalid("class_names is empty".to_string()));
        }
        Ok(())
    }

    pub fn camera(&self, id: CameraId) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let c = Config::default();
        assert_eq!(c.tracking.max_track_history, 30);
        assert_eq!(c.tracking.stop_frames_threshold, 15);
        assert_eq!(c.tracking.stop_confirm_frames, 12);
        assert_eq!(c.tracking.move_confirm_frames, 5);
        assert_eq!(c.recording.grace_frames, 15);
        assert_eq!(c.stream.input_queue_depth, 5);
        assert_eq!(c.stream.output_queue_depth, 2);
        assert_eq!((c.stream.width, c.stream.height), (1280, 720));
        assert_eq!(c.status.timeout(), Duration::from_secs(5));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let text = r#"
            [server]
            port = 9000

            [[cameras]]
            id = 1
            source = "videos/camm.mp4"

            [[cameras]]
            id = 2
            source = "rtsp://10.0.0.2/stream"
            fps = 15.0
        "#;
        let c: Config = toml::from_str(text).unwrap();
        assert_eq!(c.server.port, 9000);
        assert_eq!(c.server.host, "0.0.0.0");
        assert_eq!(c.cameras.len(), 2);
        assert_eq!(c.camera(2).and_then(|c| c.fps), Some(15.0));
        assert_eq!(c.tracking.cones_confirm_frames, 10);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_duplicate_camera_rejected() {
        let mut c = Config::default();
        for _ in 0..2 {
            c.cameras.push(CameraConfig {
                id: 3,
                source: "a.mp4".into(),
                name: None,
                fps: None,
            });
        }
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut c = Config::default();
        c.tracking.stop_confirm_frames = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_from_file_and_args_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[detection]\nmodel = \"a.onnx\"\n").unwrap();
        drop(f);

        let mut c = Config::from_file(&path).unwrap();
        assert_eq!(c.detection.model, "a.onnx");

        let args = Args::parse_from(["sentinel", "--port", "8081", "--model", "b.onnx"]);
        c.apply_args(&args);
        assert_eq!(c.server.port, 8081);
        assert_eq!(c.detection.model, "b.onnx");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let c = Config::load_or_default("/nonexistent/sentinel.toml").unwrap();
        assert!(c.cameras.is_empty());
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_clip_format_from_toml() {
        let c: Config = toml::from_str("[recording]\nclip_format = \"mjpeg\"\n").unwrap();
        assert_eq!(c.recording.clip_format, ClipFormat::Mjpeg);
        #[cfg(feature = "ffmpeg")]
        assert_eq!(Config::default().recording.clip_format, ClipFormat::Mp4);
        assert!(toml::from_str::<Config>("[recording]\nclip_format = \"webm\"\n").is_err());
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let c: Config = toml::from_str(include_str!("../config/sentinel.toml")).unwrap();
        c.validate().unwrap();
        assert_eq!(c.cameras.len(), 1);
        assert_eq!(c.cameras[0].source, "videos/camm.mp4");
        assert_eq!(c.stream.low_jpeg_quality, 45);
    }
}
