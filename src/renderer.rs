// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧标注渲染
//! Frame annotator: class labels, stopped-vehicle alerts, motion trails

use crate::analysis::TrackStore;
use crate::config::{RenderConfig, TrackingConfig};
use crate::detection::types::{Detection, NON_VEHICLE_CLASSES};
use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use phf::phf_map;
use tracing::{info, warn};

// ========== 颜色 ==========

/// 类别颜色 (RGB)
static CLASS_COLORS: phf::Map<&'static str, [u8; 3]> = phf_map! {
    "car" => [219, 152, 52],
    "bus" => [60, 76, 231],
    "camion" => [34, 126, 230],
    "truck" => [34, 126, 230],
    "furgon" => [15, 196, 241],
    "moto" => [182, 89, 155],
    "persona" => [113, 204, 46],
    "cono" => [255, 78, 217],
    "asistencia" => [166, 165, 149],
    "safety cone" => [255, 165, 0],
};

const DEFAULT_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TRAIL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PAD: i32 = 4;

pub fn class_color(class_name: &str) -> Rgb<u8> {
    CLASS_COLORS
        .get(class_name.to_lowercase().as_str())
        .map(|c| Rgb(*c))
        .unwrap_or(DEFAULT_COLOR)
}

/// 标签文本: 首字母大写, 行人/锥桶/救援不显示置信度
pub fn label_text(class_name: &str, confidence: f32) -> String {
    let mut chars = class_name.chars();
    let mut label = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    if !NON_VEHICLE_CLASSES.contains(&class_name) {
        label.push_str(&format!(" {:.2}", confidence));
    }
    label
}

/// 告警样式: 已确认停车 + 未被锥桶/救援抑制 + 车辆类别
pub fn is_alert(stopped: bool, suppressed: bool, class_name: &str) -> bool {
    stopped && !suppressed && !NON_VEHICLE_CLASSES.contains(&class_name)
}

/// 帧标注器 (每路摄像头一个, 处理线程独占)
pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
    alpha: f32,
    thickness: u32,
    max_trail: usize,
}

impl Annotator {
    pub fn new(render: &RenderConfig, tracking: &TrackingConfig) -> Self {
        let font = match &render.font_path {
            Some(path) => match load_font(path) {
                Ok(font) => {
                    info!("🔤 标注字体: {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("⚠️ 字体加载失败, 标签不显示文字: {:#}", e);
                    None
                }
            },
            None => None,
        };
        Self::with_font(font, render, tracking)
    }

    pub fn with_font(font: Option<FontArc>, render: &RenderConfig, tracking: &TrackingConfig) -> Self {
        Self {
            font,
            scale: PxScale::from(render.font_scale),
            alpha: render.label_alpha.clamp(0.0, 1.0),
            thickness: render.line_thickness.max(1),
            max_trail: tracking.max_trail,
        }
    }

    /// 在副本上绘制, 原帧保持不变
    pub fn annotate(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        tracks: &TrackStore,
        suppressed: bool,
    ) -> RgbImage {
        let mut canvas = frame.clone();

        for det in detections {
            let stopped = tracks
                .get(det.track_id)
                .map(|t| t.is_stopped())
                .unwrap_or(false);
            let alert = is_alert(stopped, suppressed, &det.class_name);
            let color = if alert {
                ALERT_COLOR
            } else {
                class_color(&det.class_name)
            };

            let mut label = label_text(&det.class_name, det.confidence);
            if alert {
                label.push_str(" ALERT");
            }
            self.draw_box(&mut canvas, det, color);
            self.draw_label(&mut canvas, det, &label, color);
        }

        for (_, track) in tracks.iter() {
            self.draw_trail(&mut canvas, &track.trail(self.max_trail));
        }

        canvas
    }

    fn draw_box(&self, canvas: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
        let x = det.bbox.x1 as i32;
        let y = det.bbox.y1 as i32;
        let w = det.bbox.width() as i32;
        let h = det.bbox.height() as i32;
        for i in 0..self.thickness as i32 {
            let (rw, rh) = (w - 2 * i, h - 2 * i);
            if rw <= 0 || rh <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x + i, y + i).of_size(rw as u32, rh as u32),
                color,
            );
        }
    }

    fn text_extent(&self, label: &str) -> (i32, i32) {
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(self.scale, font, label);
                (w as i32, h as i32)
            }
            // 无字体时按字符数估算背景宽度
            None => (
                (label.chars().count() as f32 * self.scale.x * 0.55) as i32,
                self.scale.y as i32,
            ),
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, det: &Detection, label: &str, bg: Rgb<u8>) {
        let (tw, th) = self.text_extent(label);
        let x1 = det.bbox.x1 as i32;
        let y_text = (det.bbox.y1 as i32 - th - 6).max(0);

        blend_rect(
            canvas,
            x1,
            y_text,
            tw + LABEL_PAD * 2,
            th + LABEL_PAD * 2,
            bg,
            self.alpha,
        );

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x1 + LABEL_PAD,
                y_text + LABEL_PAD,
                self.scale,
                font,
                label,
            );
        }
    }

    fn draw_trail(&self, canvas: &mut RgbImage, points: &[(f32, f32)]) {
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            for o in 0..self.thickness {
                let o = o as f32;
                draw_line_segment_mut(canvas, (a.0 + o, a.1), (b.0 + o, b.1), TRAIL_COLOR);
                draw_line_segment_mut(canvas, (a.0, a.1 + o), (b.0, b.1 + o), TRAIL_COLOR);
            }
        }
    }
}

fn load_font(path: &std::path::Path) -> Result<FontArc> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).context("invalid font data")
}

/// 半透明填充矩形 (裁剪到画面内)
fn blend_rect(canvas: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: Rgb<u8>, alpha: f32) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    let x0 = x.clamp(0, cw);
    let y0 = y.clamp(0, ch);
    let x1 = (x + w).clamp(0, cw);
    let y1 = (y + h).clamp(0, ch);
    for py in y0..y1 {
        for px in x0..x1 {
            let p = canvas.get_pixel_mut(px as u32, py as u32);
            for c in 0..3 {
                p.0[c] = (color.0[c] as f32 * alpha + p.0[c] as f32 * (1.0 - alpha)).round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::engine::mock::{car, object};

    fn annotator() -> Annotator {
        Annotator::with_font(None, &RenderConfig::default(), &TrackingConfig::default())
    }

    #[test]
    fn test_missing_default_font_falls_back() {
        let render = RenderConfig {
            font_path: Some("/nonexistent/assets/font/msyh.ttc".into()),
            ..RenderConfig::default()
        };
        let a = Annotator::new(&render, &TrackingConfig::default());
        assert!(a.font.is_none());
        assert_eq!(
            RenderConfig::default().font_path.as_deref(),
            Some(std::path::Path::new(crate::config::DEFAULT_FONT_PATH))
        );
    }

    #[test]
    fn test_label_text() {
        assert_eq!(label_text("car", 0.8731), "Car 0.87");
        assert_eq!(label_text("persona", 0.99), "Persona");
        assert_eq!(label_text("cono", 0.5), "Cono");
        assert_eq!(label_text("asistencia", 0.5), "Asistencia");
        assert_eq!(label_text("safety cone", 0.5), "Safety cone 0.50");
    }

    #[test]
    fn test_alert_rules() {
        assert!(is_alert(true, false, "car"));
        assert!(!is_alert(true, true, "car"));
        assert!(!is_alert(false, false, "car"));
        assert!(!is_alert(true, false, "persona"));
        assert!(!is_alert(true, false, "cono"));
    }

    #[test]
    fn test_class_colors() {
        assert_eq!(class_color("Car"), Rgb([219, 152, 52]));
        assert_eq!(class_color("unknown"), DEFAULT_COLOR);
    }

    #[test]
    fn test_annotate_draws_on_copy() {
        let frame = RgbImage::new(320, 240);
        let mut tracks = TrackStore::new(TrackingConfig::default());
        let dets = vec![car(1, 160.0, 150.0)];
        tracks.update(&dets);

        let out = annotator().annotate(&frame, &dets, &tracks, false);
        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
        // 框左下角为类别颜色 (上沿被标签背景覆盖)
        assert_eq!(*out.get_pixel(140, 159), class_color("car"));
    }

    #[test]
    fn test_stopped_vehicle_drawn_red_unless_suppressed() {
        let cfg = TrackingConfig::default();
        let frame = RgbImage::new(320, 240);
        let mut tracks = TrackStore::new(cfg.clone());
        let dets = vec![car(1, 160.0, 150.0), object("persona", 2, 60.0, 150.0)];
        for _ in 0..cfg.stop_frames_threshold + cfg.stop_confirm_frames as usize {
            tracks.update(&dets);
        }
        assert!(tracks.get(1).unwrap().is_stopped());

        let out = annotator().annotate(&frame, &dets, &tracks, false);
        assert_eq!(*out.get_pixel(140, 159), ALERT_COLOR);
        // 行人即使静止也不告警
        assert_eq!(*out.get_pixel(40, 159), class_color("persona"));

        let out = annotator().annotate(&frame, &dets, &tracks, true);
        assert_eq!(*out.get_pixel(140, 159), class_color("car"));
    }

    #[test]
    fn test_blend_rect_alpha_and_clip() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([100, 100, 100]));
        blend_rect(&mut img, -5, -5, 8, 8, Rgb([200, 0, 0]), 0.6);
        assert_eq!(img.get_pixel(0, 0).0, [160, 40, 40]);
        assert_eq!(img.get_pixel(3, 3).0, [100, 100, 100]);
    }

    #[test]
    fn test_trail_drawn() {
        let frame = RgbImage::new(200, 100);
        let mut tracks = TrackStore::new(TrackingConfig::default());
        for i in 0..5 {
            tracks.update(&[car(3, 50.0 + i as f32 * 20.0, 80.0)]);
        }
        let dets = vec![car(3, 130.0, 80.0)];
        let out = annotator().annotate(&frame, &dets, &tracks, false);
        assert_eq!(*out.get_pixel(60, 80), TRAIL_COLOR);
    }
}
