//! 检测结果过滤: 置信度 → 类别 → NMS → 数量上限

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::{Detection, DetectionSet, ModelKind};

/// 类别白名单
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassFilter {
    #[default]
    All,
    /// 只保留该类别 id
    Single(u32),
    /// 只保留名称在集合中的类别
    Labels(BTreeSet<String>),
}

impl ClassFilter {
    pub fn accepts(&self, detection: &Detection) -> bool {
        match self {
            ClassFilter::All => true,
            ClassFilter::Single(id) => detection.class_id == *id,
            ClassFilter::Labels(labels) => labels.contains(&detection.label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub conf_threshold: f32,
    pub class_filter: ClassFilter,
    pub use_nms: bool,
    pub nms_threshold: f32,
    pub max_detections: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            class_filter: ClassFilter::All,
            use_nms: true,
            nms_threshold: 0.4,
            max_detections: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    config: FilterConfig,
}

impl DetectionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn set_confidence_threshold(&mut self, value: f32) {
        self.config.conf_threshold = clamp_unit(value);
    }

    pub fn set_nms_threshold(&mut self, value: f32) {
        self.config.nms_threshold = clamp_unit(value);
    }

    pub fn set_use_nms(&mut self, enabled: bool) {
        self.config.use_nms = enabled;
    }

    pub fn set_max_detections(&mut self, max: usize) {
        self.config.max_detections = max;
    }

    /// 按名称启用类别; 空集合表示不限制
    pub fn set_enabled_labels<I, S>(&mut self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        self.config.class_filter = if labels.is_empty() {
            ClassFilter::All
        } else {
            ClassFilter::Labels(labels)
        };
    }

    /// 只保留一个类别; None 恢复全部类别
    pub fn set_single_class(&mut self, class_id: Option<u32>) {
        self.config.class_filter = match class_id {
            Some(id) => ClassFilter::Single(id),
            None => ClassFilter::All,
        };
    }

    pub fn apply(&self, candidates: Vec<Detection>, model_kind: ModelKind) -> DetectionSet {
        let config = &self.config;
        let mut kept: Vec<Detection> = candidates
            .into_iter()
            .filter(|d| d.confidence >= config.conf_threshold)
            .filter(|d| config.class_filter.accepts(d))
            .collect();

        if config.use_nms {
            non_max_suppression(&mut kept, config.nms_threshold);
        }

        let mut set = DetectionSet::new(kept, model_kind);
        set.sort_by_confidence();
        set.detections.truncate(config.max_detections);
        set
    }
}

/// 与类别无关的贪心 NMS, 结果按置信度降序
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
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

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.
    } else {
        value.clamp(0., 1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::Bbox;

    fn det(x: f32, confidence: f32, class_id: u32, label: &str) -> Detection {
        Detection {
            bbox: Bbox::new(x, 0., 10., 10.),
            class_id,
            confidence,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_nms_drops_overlap() {
        let filter = DetectionFilter::default();
        let set = filter.apply(vec![det(1., 0.6, 0, "person"), det(0., 0.9, 2, "car")], ModelKind::Yolo);
        assert_eq!(set.len(), 1);
        assert_eq!(set.detections[0].confidence, 0.9);
        assert_eq!(set.model_kind, ModelKind::Yolo);
    }

    #[test]
    fn test_nms_disabled_keeps_both_sorted() {
        let mut filter = DetectionFilter::default();
        filter.set_use_nms(false);
        let set = filter.apply(vec![det(1., 0.6, 0, "person"), det(0., 0.9, 0, "person")], ModelKind::Yolo);
        let conf: Vec<f32> = set.iter().map(|d| d.confidence).collect();
        assert_eq!(conf, vec![0.9, 0.6]);
    }

    #[test]
    fn test_nms_keeps_order_of_survivors() {
        let mut xs = vec![
            det(0., 0.7, 0, "a"),
            det(50., 0.9, 0, "b"),
            det(1., 0.8, 0, "c"),
            det(100., 0.7, 0, "d"),
        ];
        non_max_suppression(&mut xs, 0.4);
        let labels: Vec<&str> = xs.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_confidence_boundary_is_inclusive() {
        let filter = DetectionFilter::default();
        let set = filter.apply(vec![det(0., 0.5, 0, "person"), det(50., 0.49, 0, "person")], ModelKind::Generic);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_class_filters() {
        let candidates = vec![det(0., 0.9, 0, "person"), det(50., 0.8, 2, "car"), det(100., 0.7, 3, "motorbike")];

        let mut filter = DetectionFilter::default();
        filter.set_single_class(Some(2));
        let set = filter.apply(candidates.clone(), ModelKind::Yolo);
        assert_eq!(set.len(), 1);
        assert_eq!(set.detections[0].label, "car");

        filter.set_enabled_labels(["person", "motorbike"]);
        let labels: Vec<String> = filter.apply(candidates.clone(), ModelKind::Yolo).into_iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["person", "motorbike"]);

        filter.set_enabled_labels(Vec::<String>::new());
        assert_eq!(filter.apply(candidates, ModelKind::Yolo).len(), 3);
    }

    #[test]
    fn test_max_detections_and_setters() {
        let mut filter = DetectionFilter::default();
        filter.set_max_detections(2);
        filter.set_confidence_threshold(7.);
        assert_eq!(filter.config().conf_threshold, 1.);
        filter.set_confidence_threshold(-1.);
        assert_eq!(filter.config().conf_threshold, 0.);
        filter.set_nms_threshold(0.3);
        assert_eq!(filter.config().nms_threshold, 0.3);

        let candidates = (0..5).map(|i| det(i as f32 * 50., 0.5 + i as f32 * 0.1, 0, "person")).collect();
        let set = filter.apply(candidates, ModelKind::Yolo);
        assert_eq!(set.len(), 2);
        assert!(set.detections[0].confidence > set.detections[1].confidence);
    }
}
