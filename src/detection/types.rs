// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测结果数据结构 (Detection data model)

use std::path::Path;

use serde::{Deserialize, Serialize};

/// 检测框, 原图像素坐标 (连续坐标, 不做 +1 修正)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    /// 由左上、右下角构造
    pub fn from_corners(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn cxcy(&self) -> (f32, f32) {
        (self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union > 0. {
            self.intersection_area(another) / union
        } else {
            0.
        }
    }

    /// 是否完全位于 `width x height` 图像内
    pub fn is_within(&self, width: f32, height: f32) -> bool {
        self.xmin >= 0. && self.ymin >= 0. && self.xmax() <= width && self.ymax() <= height
    }

    /// 裁剪到图像范围内
    pub fn clipped(&self, width: f32, height: f32) -> Bbox {
        let l = self.xmin.clamp(0., width);
        let t = self.ymin.clamp(0., height);
        let r = self.xmax().clamp(0., width);
        let b = self.ymax().clamp(0., height);
        Bbox::from_corners(l, t, r, b)
    }
}

/// 分类结果 (整图一个类别)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub class_id: u32,
    pub confidence: f32,
    pub label: String,
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Bbox,
    pub class_id: u32,
    /// 置信度 [0, 1]
    pub confidence: f32,
    pub label: String,
}

/// 模型类型标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Yolo,
    Ssd,
    /// 整图分类 (如 MobileNet)
    Classification,
    #[default]
    Generic,
}

/// 网络输出编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// 每行 [cx, cy, w, h, objectness, class_0..class_n]
    Dense,
    /// 每行 [batch, class, conf, left, top, right, bottom]
    Flat,
    /// 每个类别一个分数
    Scores,
}

impl ModelKind {
    /// 根据模型文件名推断 (含 "yolo" / "ssd" / "mobilenet")
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("yolo") {
            ModelKind::Yolo
        } else if name.contains("ssd") {
            ModelKind::Ssd
        } else if name.contains("mobilenet") {
            ModelKind::Classification
        } else {
            ModelKind::Generic
        }
    }

    pub fn default_layout(&self) -> OutputLayout {
        match self {
            ModelKind::Ssd => OutputLayout::Flat,
            ModelKind::Classification => OutputLayout::Scores,
            ModelKind::Yolo | ModelKind::Generic => OutputLayout::Dense,
        }
    }

    /// 类别 id 到名称表下标的偏移; SSD 的 0 号类别为背景
    pub fn default_label_offset(&self) -> u32 {
        match self {
            ModelKind::Ssd => 1,
            ModelKind::Yolo | ModelKind::Classification | ModelKind::Generic => 0,
        }
    }
}

/// 一帧的检测结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
    /// 分类模型的 top-K 结果, 按置信度降序
    #[serde(default)]
    pub classifications: Vec<Classification>,
    pub model_kind: ModelKind,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>, model_kind: ModelKind) -> Self {
        Self {
            detections,
            classifications: Vec::new(),
            model_kind,
        }
    }

    pub fn with_classifications(classifications: Vec<Classification>, model_kind: ModelKind) -> Self {
        Self {
            detections: Vec::new(),
            classifications,
            model_kind,
        }
    }

    pub fn empty(model_kind: ModelKind) -> Self {
        Self::new(Vec::new(), model_kind)
    }

    /// 按置信度降序 (稳定排序)
    pub fn sort_by_confidence(&mut self) {
        self.detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }
}

impl IntoIterator for DetectionSet {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.into_iter()
    }
}

const COCO: [&str; 80] = [
    "person", "bicycle", "car", "motorbike", "aeroplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "sofa", "pottedplant",
    "bed", "diningtable", "toilet", "tvmonitor", "laptop", "mouse", "remote", "keyboard",
    "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase",
    "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// 类别名称表, 按类别下标排列
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassNames(pub Vec<String>);

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// COCO 80 类
    pub fn coco() -> Self {
        Self(COCO.iter().map(|s| s.to_string()).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 名称表中 `class_id - label_offset` 处的名称, 越界时为 `Class {id}`
    pub fn resolve(&self, class_id: u32, label_offset: u32) -> String {
        class_id
            .checked_sub(label_offset)
            .and_then(|index| self.0.get(index as usize))
            .cloned()
            .unwrap_or_else(|| format!("Class {}", class_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_without_pixel_offset() {
        let a = Bbox::new(0., 0., 10., 10.);
        let b = Bbox::new(5., 0., 10., 10.);
        assert_eq!(a.intersection_area(&b), 50.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&a), 1.);

        let far = Bbox::new(100., 100., 5., 5.);
        assert_eq!(a.iou(&far), 0.);
        let degenerate = Bbox::new(1., 1., 0., 0.);
        assert_eq!(degenerate.iou(&degenerate), 0.);
    }

    #[test]
    fn test_clip_and_within() {
        let b = Bbox::new(-5., 10., 30., 100.);
        assert!(!b.is_within(20., 50.));
        let c = b.clipped(20., 50.);
        assert_eq!(c, Bbox::new(0., 10., 20., 40.));
        assert!(c.is_within(20., 50.));
    }

    #[test]
    fn test_model_kind_from_path() {
        assert_eq!(ModelKind::from_path("models/yolov5s.onnx"), ModelKind::Yolo);
        assert_eq!(ModelKind::from_path("/tmp/MobileNetSSD_deploy.onnx"), ModelKind::Ssd);
        assert_eq!(ModelKind::from_path("model.onnx"), ModelKind::Generic);
        assert_eq!(ModelKind::from_path("models/MobileNetV2.onnx"), ModelKind::Classification);
        assert_eq!(ModelKind::from_path("yolov8n-pose.onnx"), ModelKind::Yolo);
        assert_eq!(ModelKind::from_path("face_detector.onnx"), ModelKind::Generic);
        assert_eq!(ModelKind::Classification.default_layout(), OutputLayout::Scores);
        assert_eq!(ModelKind::Classification.default_label_offset(), 0);
        assert_eq!(ModelKind::Ssd.default_layout(), OutputLayout::Flat);
        assert_eq!(ModelKind::Ssd.default_label_offset(), 1);
        assert_eq!(ModelKind::Yolo.default_label_offset(), 0);
    }

    #[test]
    fn test_class_names_resolve() {
        let names = ClassNames::coco();
        assert_eq!(names.len(), 80);
        assert_eq!(names.resolve(0, 0), "person");
        assert_eq!(names.resolve(999, 0), "Class 999");
        // SSD: 1 号类别对应名称表第 0 项, 0 号为背景
        assert_eq!(names.resolve(1, 1), "person");
        assert_eq!(names.resolve(0, 1), "Class 0");
    }

    #[test]
    fn test_sort_by_confidence_is_stable() {
        let det = |c: f32, id: u32| Detection {
            bbox: Bbox::default(),
            class_id: id,
            confidence: c,
            label: String::new(),
        };
        let mut set = DetectionSet::new(vec![det(0.5, 0), det(0.9, 1), det(0.5, 2)], ModelKind::Yolo);
        set.sort_by_confidence();
        let ids: Vec<u32> = set.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![1, 0, 2]);
    }
}
