// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! YOLOv8 ONNX 检测 + 每路摄像头 ByteTrack
//! YOLOv8 ONNX Runtime detector with per-camera ByteTrack

use super::bytetrack::{ByteTrackConfig, ByteTracker};
use super::engine::TrackingEngine;
use super::types::{non_max_suppression, BBox, Detection};
use crate::config::DetectionConfig;
use crate::input::Frame;
use crate::CameraId;
use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::{ArrayView2, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

const CXYWH_OFFSET: usize = 4;
/// 填充色 (与训练时一致)
const LETTERBOX_FILL: f32 = 144.0 / 255.0;

/// 缩放比例与缩放后尺寸 (保持长宽比, 左上对齐)
pub fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 四周补边 (黑色)
pub fn pad_image(image: &RgbImage, padding: u32) -> RgbImage {
    if padding == 0 {
        return image.clone();
    }
    let mut padded = RgbImage::new(image.width() + padding * 2, image.height() + padding * 2);
    image::imageops::replace(&mut padded, image, padding as i64, padding as i64);
    padded
}

/// 解析 `[4 + nc, N]` 输出, 坐标还原到原图 (扣除补边)
pub fn decode_predictions(
    preds: ArrayView2<f32>,
    ratio: f32,
    padding: f32,
    frame_w: f32,
    frame_h: f32,
    conf_threshold: f32,
) -> Vec<BBox> {
    let mut boxes = Vec::new();
    for pred in preds.axis_iter(Axis(1)) {
        let mut best = (0usize, f32::MIN);
        for (id, &score) in pred.iter().enumerate().skip(CXYWH_OFFSET) {
            if score > best.1 {
                best = (id - CXYWH_OFFSET, score);
            }
        }
        let (class_id, confidence) = best;
        if confidence < conf_threshold {
            continue;
        }

        let cx = pred[0] / ratio - padding;
        let cy = pred[1] / ratio - padding;
        let w = pred[2] / ratio;
        let h = pred[3] / ratio;
        let bbox = BBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            confidence,
            class_id: class_id as u32,
        }
        .clamp(frame_w, frame_h);
        if bbox.area() > 0.0 {
            boxes.push(bbox);
        }
    }
    boxes
}

/// YOLOv8 检测器
pub struct YoloDetector {
    session: Session,
    input_size: u32,
    num_classes: usize,
    padding: u32,
    conf_threshold: f32,
    iou_threshold: f32,
    resizer: fr::Resizer,
}

impl YoloDetector {
    pub fn new(config: &DetectionConfig, conf_threshold: f32) -> Result<Self> {
        info!("📦 加载检测模型: {}", config.model);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(&config.model)
            .with_context(|| format!("failed to load model {}", config.model))?;
        info!("✅ 检测模型加载成功 ({} 类)", config.class_names.len());

        Ok(Self {
            session,
            input_size: config.input_size,
            num_classes: config.class_names.len(),
            padding: config.inference_padding,
            conf_threshold,
            iou_threshold: config.iou_threshold,
            resizer: fr::Resizer::new(),
        })
    }

    fn preprocess(&mut self, image: &RgbImage) -> Result<(Vec<f32>, f32)> {
        let size = self.input_size as usize;
        let (w0, h0) = image.dimensions();
        let (ratio, w_new, h_new) =
            scale_wh(w0 as f32, h0 as f32, size as f32, size as f32);
        let (w_new, h_new) = (w_new as u32, h_new as u32);

        let src = fr::images::Image::from_vec_u8(w0, h0, image.as_raw().clone(), fr::PixelType::U8x3)?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        // HWC → CHW, 左上对齐, 其余填充
        let plane = size * size;
        let mut input = vec![LETTERBOX_FILL; 3 * plane];
        let pixels = dst.buffer();
        for y in 0..h_new as usize {
            for x in 0..w_new as usize {
                let src_idx = (y * w_new as usize + x) * 3;
                let dst_idx = y * size + x;
                input[dst_idx] = pixels[src_idx] as f32 / 255.0;
                input[plane + dst_idx] = pixels[src_idx + 1] as f32 / 255.0;
                input[2 * plane + dst_idx] = pixels[src_idx + 2] as f32 / 255.0;
            }
        }
        Ok((input, ratio))
    }

    /// 检测一帧, 返回原图坐标下的检测框 (已NMS)
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BBox>> {
        let t_pre = Instant::now();
        let padded = pad_image(image, self.padding);
        let (input, ratio) = self.preprocess(&padded)?;
        let pre_ms = t_pre.elapsed().as_secs_f64() * 1000.0;

        let t_run = Instant::now();
        let size = self.input_size as usize;
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        let run_ms = t_run.elapsed().as_secs_f64() * 1000.0;

        let rows = CXYWH_OFFSET + self.num_classes;
        if data.is_empty() || data.len() % rows != 0 {
            bail!(
                "unexpected model output length {} for {} classes",
                data.len(),
                self.num_classes
            );
        }
        let preds = ArrayView2::from_shape((rows, data.len() / rows), data)?;
        let mut boxes = decode_predictions(
            preds,
            ratio,
            self.padding as f32,
            image.width() as f32,
            image.height() as f32,
            self.conf_threshold,
        );
        non_max_suppression(&mut boxes, self.iou_threshold);

        debug!(
            "🔍 预处理 {:.1}ms | 推理 {:.1}ms | 检测 {} 个",
            pre_ms,
            run_ms,
            boxes.len()
        );
        Ok(boxes)
    }
}

/// YOLO + ByteTrack 跟踪引擎
pub struct YoloTrackingEngine {
    detector: YoloDetector,
    class_names: Vec<String>,
    track_config: ByteTrackConfig,
    trackers: HashMap<CameraId, ByteTracker>,
}

impl YoloTrackingEngine {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let track_config = ByteTrackConfig {
            high_score_threshold: config.min_confidence,
            ..Default::default()
        };
        // 低分框也送入跟踪器用于救援
        let detector = YoloDetector::new(config, track_config.low_score_threshold)?;
        Ok(Self {
            detector,
            class_names: config.class_names.iter().map(|n| n.to_lowercase()).collect(),
            track_config,
            trackers: HashMap::new(),
        })
    }

    fn class_name(&self, class_id: u32) -> String {
        self.class_names
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }
}

impl TrackingEngine for YoloTrackingEngine {
    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let boxes = self.detector.detect(&frame.image)?;
        let tracker = self
            .trackers
            .entry(frame.camera)
            .or_insert_with(|| ByteTracker::new(self.track_config.clone()));
        let tracks = tracker.update(&boxes);

        Ok(tracks
            .into_iter()
            .map(|(id, bbox)| {
                let name = self.class_name(bbox.class_id);
                Detection::new(name, bbox, id)
            })
            .collect())
    }

    fn reset_camera(&mut self, camera: CameraId) {
        self.trackers.remove(&camera);
    }

    fn name(&self) -> &str {
        "yolov8-bytetrack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_scale_wh() {
        let (r, w, h) = scale_wh(1320.0, 760.0, 640.0, 640.0);
        assert!((r - 640.0 / 1320.0).abs() < 1e-6);
        assert_eq!(w, 640.0);
        assert_eq!(h, (760.0f32 * 640.0 / 1320.0).round());
    }

    #[test]
    fn test_pad_image() {
        let img = RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 0]));
        let padded = pad_image(&img, 3);
        assert_eq!(padded.dimensions(), (10, 8));
        assert_eq!(padded.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(padded.get_pixel(3, 3).0, [255, 0, 0]);
        assert_eq!(padded.get_pixel(6, 4).0, [255, 0, 0]);
        assert_eq!(padded.get_pixel(7, 5).0, [0, 0, 0]);
    }

    #[test]
    fn test_decode_removes_padding_offset() {
        // 2 类, 3 个候选
        let mut preds = Array2::<f32>::zeros((6, 3));
        // 候选0: 补边坐标中心(120,70) 宽40 高20, 类别1
        preds[[0, 0]] = 120.0 * 0.5;
        preds[[1, 0]] = 70.0 * 0.5;
        preds[[2, 0]] = 40.0 * 0.5;
        preds[[3, 0]] = 20.0 * 0.5;
        preds[[5, 0]] = 0.8;
        // 候选1: 低分
        preds[[4, 1]] = 0.05;
        // 候选2: 超出画面, 裁剪
        preds[[0, 2]] = 5.0;
        preds[[1, 2]] = 5.0;
        preds[[2, 2]] = 40.0;
        preds[[3, 2]] = 40.0;
        preds[[4, 2]] = 0.9;

        let boxes = decode_predictions(preds.view(), 0.5, 20.0, 640.0, 360.0, 0.25);
        assert_eq!(boxes.len(), 2);

        let b = &boxes[0];
        assert_eq!(b.class_id, 1);
        assert!((b.x1 - 80.0).abs() < 1e-4);
        assert!((b.y1 - 40.0).abs() < 1e-4);
        assert!((b.x2 - 120.0).abs() < 1e-4);
        assert!((b.y2 - 60.0).abs() < 1e-4);

        let c = &boxes[1];
        assert_eq!(c.class_id, 0);
        assert_eq!((c.x1, c.y1), (0.0, 0.0));
    }
}
