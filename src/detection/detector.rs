//! 检测器 (Detector)
//! 职责: 图像 → 推理后端 → 解码 → 过滤 → DetectionSet

use std::time::Instant;

use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array, IxDyn};

use super::decoder::{DecoderConfig, DetectionDecoder};
use super::filter::{DetectionFilter, FilterConfig};
use super::types::{ClassNames, DetectionSet, ModelKind, OutputLayout};

/// 推理后端接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → run_inference (预处理 + 前向) → 原始输出张量
///          ↓
///     DetectionDecoder (按 output_layout 解码)
///          ↓
///     DetectionFilter → DetectionSet
/// ```
pub trait InferenceBackend: Send {
    /// 预处理并执行前向传播, 返回未解码的输出
    fn run_inference(&mut self, image: &DynamicImage) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 输出张量的编码方式
    fn output_layout(&self) -> OutputLayout;

    fn model_kind(&self) -> ModelKind {
        ModelKind::Generic
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn run_inference(&mut self, image: &DynamicImage) -> Result<Vec<Array<f32, IxDyn>>> {
        (**self).run_inference(image)
    }

    fn output_layout(&self) -> OutputLayout {
        (**self).output_layout()
    }

    fn model_kind(&self) -> ModelKind {
        (**self).model_kind()
    }
}

/// 最近一次 detect 的耗时统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectorStats {
    /// 预处理 + 推理 (ms)
    pub inference_ms: f64,
    /// 解码 + 过滤 (ms)
    pub postprocess_ms: f64,
    pub detections: usize,
}

pub struct Detector<B> {
    backend: B,
    decoder: DetectionDecoder,
    filter: DetectionFilter,
    stats: DetectorStats,
}

impl<B: InferenceBackend> Detector<B> {
    pub fn new(backend: B, names: ClassNames, decoder: DecoderConfig, filter: FilterConfig) -> Self {
        let kind = backend.model_kind();
        Self {
            decoder: DetectionDecoder::new(decoder, names, kind),
            filter: DetectionFilter::new(filter),
            backend,
            stats: DetectorStats::default(),
        }
    }

    /// 使用后端模型类型的默认配置
    pub fn with_defaults(backend: B, names: ClassNames) -> Self {
        let decoder = DecoderConfig::for_model(backend.model_kind());
        Self::new(backend, names, decoder, FilterConfig::default())
    }

    /// 检测一帧; 推理或解码失败时返回空结果集
    pub fn detect(&mut self, image: &DynamicImage) -> DetectionSet {
        let kind = self.backend.model_kind();
        let started = Instant::now();
        let outputs = match self.backend.run_inference(image) {
            Ok(outputs) => outputs,
            Err(e) => {
                tracing::warn!("⚠️ 推理失败: {:#}", e);
                self.stats = DetectorStats {
                    inference_ms: elapsed_ms(started),
                    ..DetectorStats::default()
                };
                return DetectionSet::empty(kind);
            }
        };
        let inference_ms = elapsed_ms(started);

        let started = Instant::now();
        let candidates = self
            .decoder
            .decode(self.backend.output_layout(), &outputs, image.dimensions());
        let mut set = self.filter.apply(candidates.detections, kind);
        // 分类结果已在解码时按阈值与 top-K 截取
        set.classifications = candidates.classifications;

        self.stats = DetectorStats {
            inference_ms,
            postprocess_ms: elapsed_ms(started),
            detections: set.len(),
        };
        tracing::debug!(
            "检测 {} 个目标, 推理 {:.1}ms, 后处理 {:.1}ms",
            set.len(),
            self.stats.inference_ms,
            self.stats.postprocess_ms
        );
        set
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn decoder_mut(&mut self) -> &mut DetectionDecoder {
        &mut self.decoder
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut DetectionFilter {
        &mut self.filter
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        outputs: Vec<Array<f32, IxDyn>>,
        fail: bool,
    }

    impl InferenceBackend for Fixed {
        fn run_inference(&mut self, _image: &DynamicImage) -> Result<Vec<Array<f32, IxDyn>>> {
            if self.fail {
                anyhow::bail!("模型未加载");
            }
            Ok(self.outputs.clone())
        }

        fn output_layout(&self) -> OutputLayout {
            OutputLayout::Dense
        }

        fn model_kind(&self) -> ModelKind {
            ModelKind::Yolo
        }
    }

    fn rows(values: Vec<f32>) -> Array<f32, IxDyn> {
        let n = values.len() / 7;
        Array::from_shape_vec(IxDyn(&[1, n, 7]), values).unwrap()
    }

    #[test]
    fn test_detect_decodes_and_filters() {
        let backend = Fixed {
            outputs: vec![rows(vec![
                0.5, 0.5, 0.2, 0.4, 0.9, 0.8, 0.1, //
                0.51, 0.5, 0.2, 0.4, 0.9, 0.6, 0.1, // 与上一个框重叠
            ])],
            fail: false,
        };
        let mut detector = Detector::with_defaults(backend, ClassNames::coco());
        let set = detector.detect(&DynamicImage::new_rgb8(100, 100));
        assert_eq!(set.len(), 1);
        assert_eq!(set.model_kind, ModelKind::Yolo);
        assert_eq!(detector.stats().detections, 1);
    }

    #[test]
    fn test_inference_failure_is_empty() {
        let backend: Box<dyn InferenceBackend> = Box::new(Fixed {
            outputs: Vec::new(),
            fail: true,
        });
        let mut detector = Detector::with_defaults(backend, ClassNames::coco());
        let set = detector.detect(&DynamicImage::new_rgb8(10, 10));
        assert!(set.is_empty());
        assert_eq!(set.model_kind, ModelKind::Yolo);
        assert_eq!(detector.stats().detections, 0);
    }
}
