//! 网络原始输出解码 (Dense / Flat)
//!
//! Dense: 每层输出一个 `[N, 5+C]` 或 `[1, N, 5+C]` 张量, 坐标为归一化的中心点与宽高.
//! Flat:  `[.., 7]` 张量, 每行 `[batch, class, conf, left, top, right, bottom]`, 坐标归一化.
//! Scores: 第一个输出的全部元素按顺序视为各类别分数, 取 top-K.

use ndarray::{Array, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{Bbox, ClassNames, Classification, Detection, DetectionSet, ModelKind, OutputLayout};

/// 越界检测框的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxPolicy {
    /// 裁剪到图像范围
    #[default]
    Clip,
    /// 丢弃越界的框
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub conf_threshold: f32,
    /// 类别 id 到名称表下标的偏移
    pub label_offset: u32,
    pub box_policy: BoxPolicy,
    /// 分类模型保留的类别数
    pub top_k: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            label_offset: 0,
            box_policy: BoxPolicy::Clip,
            top_k: 5,
        }
    }
}

impl DecoderConfig {
    /// 按模型类型取默认的标签偏移
    pub fn for_model(kind: ModelKind) -> Self {
        Self {
            label_offset: kind.default_label_offset(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("无法识别的 {layout:?} 输出形状 {shape:?}")]
    UnrecognizedShape { layout: OutputLayout, shape: Vec<usize> },
    #[error("网络没有输出")]
    EmptyOutput,
    #[error("{0:?} 输出不含检测框")]
    NoBoxes(OutputLayout),
}

const FLAT_WIDTH: usize = 7;
const DENSE_HEADER: usize = 5;

#[derive(Debug, Clone)]
pub struct DetectionDecoder {
    config: DecoderConfig,
    names: ClassNames,
    model_kind: ModelKind,
}

impl DetectionDecoder {
    pub fn new(config: DecoderConfig, names: ClassNames, model_kind: ModelKind) -> Self {
        Self {
            config,
            names,
            model_kind,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DecoderConfig {
        &mut self.config
    }

    pub fn names(&self) -> &ClassNames {
        &self.names
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model_kind
    }

    /// 解码, 出错时返回空结果集
    pub fn decode(
        &self,
        layout: OutputLayout,
        outputs: &[Array<f32, IxDyn>],
        image_size: (u32, u32),
    ) -> DetectionSet {
        let decoded = match layout {
            OutputLayout::Scores => self
                .try_classify(outputs)
                .map(|top| DetectionSet::with_classifications(top, self.model_kind)),
            _ => self
                .try_decode(layout, outputs, image_size)
                .map(|detections| DetectionSet::new(detections, self.model_kind)),
        };
        match decoded {
            Ok(set) => set,
            Err(e) => {
                warn!("⚠️ 检测输出解码失败: {}", e);
                DetectionSet::empty(self.model_kind)
            }
        }
    }

    pub fn try_decode(
        &self,
        layout: OutputLayout,
        outputs: &[Array<f32, IxDyn>],
        image_size: (u32, u32),
    ) -> Result<Vec<Detection>, DecodeError> {
        if outputs.is_empty() || outputs.iter().all(|t| t.is_empty()) {
            return Err(DecodeError::EmptyOutput);
        }
        let size = (image_size.0 as f32, image_size.1 as f32);
        let mut detections = Vec::new();
        for (i, tensor) in outputs.iter().enumerate() {
            let before = detections.len();
            match layout {
                OutputLayout::Dense => self.decode_dense(tensor, size, &mut detections)?,
                OutputLayout::Flat => self.decode_flat(tensor, size, &mut detections)?,
                OutputLayout::Scores => return Err(DecodeError::NoBoxes(layout)),
            }
            debug!(
                "输出层 {} 形状 {:?}: {} 个候选",
                i,
                tensor.shape(),
                detections.len() - before
            );
        }
        Ok(detections)
    }

    /// 分类输出: 取第一个输出的 top-K, 分数需严格高于阈值, 按置信度降序
    pub fn try_classify(&self, outputs: &[Array<f32, IxDyn>]) -> Result<Vec<Classification>, DecodeError> {
        let scores = match outputs.first() {
            Some(tensor) if !tensor.is_empty() => tensor,
            _ => return Err(DecodeError::EmptyOutput),
        };

        let mut ranked: Vec<(u32, f32)> = scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .map(|(i, s)| (i as u32, s))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(self.config.top_k);

        let top: Vec<Classification> = ranked
            .into_iter()
            .filter(|&(_, s)| s > self.config.conf_threshold)
            .map(|(class_id, confidence)| Classification {
                label: self.names.resolve(class_id, self.config.label_offset),
                class_id,
                confidence,
            })
            .collect();
        debug!("分类输出形状 {:?}: {} 个类别入选", scores.shape(), top.len());
        Ok(top)
    }

    fn decode_dense(
        &self,
        tensor: &Array<f32, IxDyn>,
        (width, height): (f32, f32),
        out: &mut Vec<Detection>,
    ) -> Result<(), DecodeError> {
        let shape = tensor.shape();
        let rows = match shape.len() {
            2 => tensor.view(),
            3 if shape[0] == 1 => tensor.index_axis(Axis(0), 0),
            _ => return Err(self.unrecognized(OutputLayout::Dense, shape)),
        };
        if rows.shape()[1] <= DENSE_HEADER {
            return Err(self.unrecognized(OutputLayout::Dense, shape));
        }

        let threshold = self.config.conf_threshold;
        for row in rows.axis_iter(Axis(0)) {
            let row: Vec<f32> = row.iter().copied().collect();
            if row[4] <= threshold {
                continue;
            }
            let (class_id, score) = row[DENSE_HEADER..]
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });
            if score <= threshold {
                continue;
            }

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let bbox = Bbox::new((cx - w / 2.) * width, (cy - h / 2.) * height, w * width, h * height);
            if let Some(detection) = self.finish(bbox, class_id as u32, score, (width, height)) {
                out.push(detection);
            }
        }
        Ok(())
    }

    fn decode_flat(
        &self,
        tensor: &Array<f32, IxDyn>,
        (width, height): (f32, f32),
        out: &mut Vec<Detection>,
    ) -> Result<(), DecodeError> {
        let shape = tensor.shape();
        if shape.is_empty() || shape[shape.len() - 1] != FLAT_WIDTH {
            return Err(self.unrecognized(OutputLayout::Flat, shape));
        }

        let values: Vec<f32> = tensor.iter().copied().collect();
        for row in values.chunks_exact(FLAT_WIDTH) {
            let confidence = row[2];
            if confidence <= self.config.conf_threshold || row[1] < 0. || !row[1].is_finite() {
                continue;
            }
            let (l, t, r, b) = (row[3], row[4], row[5], row[6]);
            let bbox = Bbox::new(l * width, t * height, (r - l) * width, (b - t) * height);
            if let Some(detection) = self.finish(bbox, row[1] as u32, confidence, (width, height)) {
                out.push(detection);
            }
        }
        Ok(())
    }

    /// 按框策略收尾, 退化或越界 (Reject) 的框返回 None
    fn finish(&self, bbox: Bbox, class_id: u32, confidence: f32, (width, height): (f32, f32)) -> Option<Detection> {
        if !valid_extent(&bbox) {
            debug!("丢弃退化检测框 {:?}", bbox);
            return None;
        }
        let bbox = match self.config.box_policy {
            BoxPolicy::Clip => bbox.clipped(width, height),
            BoxPolicy::Reject if bbox.is_within(width, height) => bbox,
            BoxPolicy::Reject => {
                debug!("丢弃越界检测框 {:?}", bbox);
                return None;
            }
        };
        if !valid_extent(&bbox) {
            return None;
        }
        Some(Detection {
            label: self.names.resolve(class_id, self.config.label_offset),
            bbox,
            class_id,
            confidence,
        })
    }

    fn unrecognized(&self, layout: OutputLayout, shape: &[usize]) -> DecodeError {
        DecodeError::UnrecognizedShape {
            layout,
            shape: shape.to_vec(),
        }
    }
}

fn valid_extent(bbox: &Bbox) -> bool {
    [bbox.xmin(), bbox.ymin(), bbox.width(), bbox.height()]
        .iter()
        .all(|v| v.is_finite())
        && bbox.width() > 0.
        && bbox.height() > 0.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(config: DecoderConfig) -> DetectionDecoder {
        DetectionDecoder::new(config, ClassNames::coco(), ModelKind::Generic)
    }

    fn tensor(shape: &[usize], values: Vec<f32>) -> Array<f32, IxDyn> {
        Array::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    fn assert_box(b: &Bbox, expected: (f32, f32, f32, f32)) {
        let got = (b.xmin(), b.ymin(), b.width(), b.height());
        assert!(
            (got.0 - expected.0).abs() < 1e-3
                && (got.1 - expected.1).abs() < 1e-3
                && (got.2 - expected.2).abs() < 1e-3
                && (got.3 - expected.3).abs() < 1e-3,
            "{:?} != {:?}",
            got,
            expected
        );
    }

    #[test]
    fn test_dense_row() {
        let out = tensor(&[1, 7], vec![0.5, 0.5, 0.2, 0.4, 0.9, 0.8, 0.1]);
        let set = decoder(DecoderConfig::default()).decode(OutputLayout::Dense, &[out], (100, 100));
        assert_eq!(set.len(), 1);
        let d = &set.detections[0];
        assert_box(&d.bbox, (40., 30., 20., 40.));
        assert_eq!(d.class_id, 0);
        assert_eq!(d.label, "person");
        assert!((d.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_dense_batched_and_multi_layer() {
        let a = tensor(&[1, 2, 7], vec![
            0.5, 0.5, 0.2, 0.4, 0.9, 0.8, 0.1, //
            0.5, 0.5, 0.2, 0.4, 0.3, 0.9, 0.1, // objectness 不足
        ]);
        let b = tensor(&[1, 7], vec![0.2, 0.2, 0.1, 0.1, 0.95, 0.1, 0.7]);
        let set = decoder(DecoderConfig::default()).decode(OutputLayout::Dense, &[a, b], (100, 100));
        let ids: Vec<u32> = set.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_dense_class_score_must_pass() {
        let out = tensor(&[1, 7], vec![0.5, 0.5, 0.2, 0.4, 0.9, 0.4, 0.3]);
        let set = decoder(DecoderConfig::default()).decode(OutputLayout::Dense, &[out], (100, 100));
        assert!(set.is_empty());
    }

    #[test]
    fn test_flat_tuple() {
        let out = tensor(&[1, 1, 1, 7], vec![0., 1., 0.95, 0.1, 0.2, 0.5, 0.6]);
        let set = decoder(DecoderConfig::default()).decode(OutputLayout::Flat, &[out], (200, 100));
        assert_eq!(set.len(), 1);
        let d = &set.detections[0];
        assert_box(&d.bbox, (20., 20., 80., 40.));
        assert_eq!(d.class_id, 1);
        assert_eq!(d.label, "bicycle");
        assert!((d.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_flat_label_offset() {
        let out = tensor(&[1, 7], vec![0., 1., 0.95, 0.1, 0.2, 0.5, 0.6]);
        let decoder = DetectionDecoder::new(
            DecoderConfig::for_model(ModelKind::Ssd),
            ClassNames::coco(),
            ModelKind::Ssd,
        );
        let set = decoder.decode(OutputLayout::Flat, &[out], (200, 100));
        assert_eq!(set.detections[0].label, "person");
        assert_eq!(set.model_kind, ModelKind::Ssd);
    }

    #[test]
    fn test_box_policy() {
        let out = tensor(&[1, 7], vec![0., 2., 0.9, -0.1, 0.5, 0.3, 1.2]);
        let clipped = decoder(DecoderConfig::default()).decode(OutputLayout::Flat, &[out.clone()], (100, 100));
        assert_box(&clipped.detections[0].bbox, (0., 50., 30., 50.));

        let reject = DecoderConfig {
            box_policy: BoxPolicy::Reject,
            ..Default::default()
        };
        assert!(decoder(reject).decode(OutputLayout::Flat, &[out], (100, 100)).is_empty());
    }

    #[test]
    fn test_degenerate_boxes_dropped() {
        let out = tensor(&[3, 7], vec![
            0., 1., 0.9, 0.5, 0.5, 0.5, 0.8, // 宽度为 0
            0., 1., 0.9, 0.5, 0.5, 0.4, 0.8, // 宽度为负
            0., 1., 0.9, f32::NAN, 0.1, 0.5, 0.8,
        ]);
        assert!(decoder(DecoderConfig::default())
            .decode(OutputLayout::Flat, &[out], (100, 100))
            .is_empty());
    }

    #[test]
    fn test_errors_degrade_to_empty() {
        let d = decoder(DecoderConfig::default());
        assert_eq!(d.try_decode(OutputLayout::Dense, &[], (10, 10)), Err(DecodeError::EmptyOutput));

        let bad = tensor(&[2, 3, 7], vec![0.; 42]);
        assert!(matches!(
            d.try_decode(OutputLayout::Dense, &[bad.clone()], (10, 10)),
            Err(DecodeError::UnrecognizedShape { .. })
        ));
        assert!(d.decode(OutputLayout::Dense, &[bad], (10, 10)).is_empty());

        let narrow = tensor(&[1, 6], vec![0.; 6]);
        assert!(matches!(
            d.try_decode(OutputLayout::Flat, &[narrow], (10, 10)),
            Err(DecodeError::UnrecognizedShape { .. })
        ));

        let scores = tensor(&[1, 3], vec![0.9, 0.1, 0.1]);
        assert_eq!(
            d.try_decode(OutputLayout::Scores, &[scores], (10, 10)),
            Err(DecodeError::NoBoxes(OutputLayout::Scores))
        );
    }

    fn classifier(config: DecoderConfig) -> DetectionDecoder {
        DetectionDecoder::new(config, ClassNames::coco(), ModelKind::Classification)
    }

    #[test]
    fn test_classify_top_k_descending() {
        let mut scores = vec![0.0; 10];
        for (i, s) in [(3, 0.7), (1, 0.95), (8, 0.6), (0, 0.55), (5, 0.8), (9, 0.65)] {
            scores[i] = s;
        }
        let out = tensor(&[1, 10], scores);
        let set = classifier(DecoderConfig::default()).decode(OutputLayout::Scores, &[out], (224, 224));

        assert!(set.detections.is_empty());
        assert_eq!(set.model_kind, ModelKind::Classification);
        let ids: Vec<u32> = set.classifications.iter().map(|c| c.class_id).collect();
        // 0.55 排在第 6 位, 被 top-5 截掉
        assert_eq!(ids, vec![1, 5, 3, 9, 8]);
        assert_eq!(set.classifications[0].label, "bicycle");
        assert!((set.classifications[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_classify_threshold_is_strict() {
        let out = tensor(&[4], vec![0.5, 0.51, 0.2, f32::NAN]);
        let top = classifier(DecoderConfig::default()).try_classify(&[out]).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].class_id, 1);

        let out = tensor(&[1, 3], vec![0.1, 0.2, 0.3]);
        assert!(classifier(DecoderConfig::default()).try_classify(&[out]).unwrap().is_empty());
    }

    #[test]
    fn test_classify_labels_and_errors() {
        let mut scores = vec![0.0; 1001];
        scores[1000] = 0.9;
        let top = classifier(DecoderConfig::default())
            .try_classify(&[tensor(&[1, 1001], scores)])
            .unwrap();
        assert_eq!(top[0].label, "Class 1000");

        let d = classifier(DecoderConfig::default());
        assert_eq!(d.try_classify(&[]), Err(DecodeError::EmptyOutput));
        let set = d.decode(OutputLayout::Scores, &[tensor(&[0], vec![])], (10, 10));
        assert!(set.classifications.is_empty());
    }
}
