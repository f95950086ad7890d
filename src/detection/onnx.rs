//! ONNX Runtime 推理后端 (feature = "onnx")

use std::path::Path;

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array, IxDyn};
use ort::{GraphOptimizationLevel, Session, Tensor};

use super::detector::InferenceBackend;
use super::types::{ModelKind, OutputLayout};

/// 预处理参数
#[derive(Debug, Clone, PartialEq)]
pub struct OrtOptions {
    /// 网络输入尺寸 (宽, 高)
    pub input_size: (u32, u32),
    /// 像素缩放系数, 例如 1/255
    pub scale: f32,
    pub layout: Option<OutputLayout>,
}

impl Default for OrtOptions {
    fn default() -> Self {
        Self {
            input_size: (640, 640),
            scale: 1.0 / 255.0,
            layout: None,
        }
    }
}

pub struct OrtBackend {
    session: Session,
    options: OrtOptions,
    kind: ModelKind,
    layout: OutputLayout,
}

impl OrtBackend {
    /// 加载模型; 模型类型由文件名推断
    pub fn load(path: impl AsRef<Path>, options: OrtOptions) -> Result<Self> {
        let path = path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)?;
        let kind = ModelKind::from_path(path);
        let layout = options.layout.unwrap_or_else(|| kind.default_layout());
        tracing::info!(
            "✅ 模型加载完成: {} ({:?}, {:?}, 输入 {}x{})",
            path.display(),
            kind,
            layout,
            options.input_size.0,
            options.input_size.1
        );
        Ok(Self {
            session,
            options,
            kind,
            layout,
        })
    }

    /// 缩放到输入尺寸, RGB, 乘以缩放系数, NCHW
    fn preprocess(&self, image: &DynamicImage) -> Vec<f32> {
        let (w, h) = self.options.input_size;
        let rgb = image.resize_exact(w, h, FilterType::Triangle).to_rgb8();
        let plane = (w * h) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = pixel[c] as f32 * self.options.scale;
            }
        }
        data
    }
}

impl InferenceBackend for OrtBackend {
    fn run_inference(&mut self, image: &DynamicImage) -> Result<Vec<Array<f32, IxDyn>>> {
        let (w, h) = self.options.input_size;
        let input = Tensor::from_array(([1usize, 3, h as usize, w as usize], self.preprocess(image)))?;
        let outputs = self.session.run(ort::inputs![input]?)?;

        let mut ys = Vec::with_capacity(outputs.len());
        for (name, value) in outputs.iter() {
            let (shape, data) = value.try_extract_raw_tensor::<f32>()?;
            let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let y = Array::from_shape_vec(IxDyn(&shape), data.to_vec())
                .map_err(|e| anyhow!("输出 {} 形状错误: {}", name, e))?;
            ys.push(y);
        }
        Ok(ys)
    }

    fn output_layout(&self) -> OutputLayout {
        self.layout
    }

    fn model_kind(&self) -> ModelKind {
        self.kind
    }
}
