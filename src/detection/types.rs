// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统数据结构定义
/// Data structures for detection and tracking
use crate::TrackId;
use serde::Serialize;

// ========== 公共常量 ==========

/// 不参与车辆统计与停车告警的类别
pub const NON_VEHICLE_CLASSES: [&str; 3] = ["persona", "cono", "asistencia"];

pub const CONE_CLASS: &str = "cono";
pub const ASSISTANCE_CLASS: &str = "asistencia";

/// 是否为车辆类别
pub fn is_vehicle_class(class_name: &str) -> bool {
    !NON_VEHICLE_CLASSES.contains(&class_name)
}

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
            class_id: 0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 平移 (补边坐标 → 原图坐标)
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
            ..self.clone()
        }
    }

    /// 裁剪到画面内
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
            ..self.clone()
        }
    }
}

/// 单帧跟踪结果: 类别 + 框 + 置信度 + 跟踪ID
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_name: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub track_id: TrackId,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, bbox: BBox, track_id: TrackId) -> Self {
        let confidence = bbox.confidence;
        Self {
            class_name: class_name.into().to_lowercase(),
            bbox,
            confidence,
            track_id,
        }
    }

    /// 质心 (像素取整, 与轨迹历史一致)
    pub fn centroid(&self) -> (f32, f32) {
        let (cx, cy) = self.bbox.center();
        (cx.trunc(), cy.trunc())
    }

    pub fn is_vehicle(&self) -> bool {
        is_vehicle_class(&self.class_name)
    }
}

// ========== 工具函数 ==========

/// 按类别的非极大值抑制 (NMS)
pub fn non_max_suppression(xs: &mut Vec<BBox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            if super::tracker::compute_iou(&xs[prev_index], &xs[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
