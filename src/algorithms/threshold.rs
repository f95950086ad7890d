//! 二值化: 固定阈值 / Otsu / 自适应

use anyhow::Result;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::{box_filter, gaussian_blur_f32};
use once_cell::sync::Lazy;

use super::blur::sigma_for_kernel;
use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::{map_gray, Frame};
use crate::params;

static BINARY: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::THRESHOLD,
        "二值化",
        "将图像转换为黑白二值图像",
        vec![
            ParameterSpec::int("threshold", "阈值", 128)
                .range(0.0, 255.0)
                .describe("二值化的阈值"),
            ParameterSpec::int("maxVal", "最大值", 255)
                .range(0.0, 255.0)
                .describe("二值化的最大值"),
        ],
    )
});

static OTSU: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::OTSU,
        "Otsu二值化",
        "使用Otsu方法自动计算最佳阈值进行二值化",
        vec![ParameterSpec::boolean("invert", "反转", false).describe("是否反转二值化结果")],
    )
});

static ADAPTIVE: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::ADAPTIVE_THRESHOLD,
        "自适应二值化",
        "根据图像局部区域自适应计算阈值进行二值化",
        vec![
            ParameterSpec::int("blockSize", "块大小", 11)
                .range(3.0, 99.0)
                .odd()
                .describe("计算阈值的邻域大小 (必须为奇数)"),
            ParameterSpec::float("C", "常数C", 2.0)
                .range(-50.0, 50.0)
                .describe("从平均值或加权平均值中减去的常数"),
            ParameterSpec::enumeration("method", "方法", 0, &["均值", "高斯加权"]),
            ParameterSpec::boolean("invert", "反转", false),
        ],
    )
});

/// 固定阈值二值化
#[derive(Clone, Debug)]
pub struct BinaryThreshold {
    threshold: u8,
    max_val: u8,
}

impl Default for BinaryThreshold {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryThreshold {
    pub fn new() -> Self {
        Self {
            threshold: 128,
            max_val: 255,
        }
    }
}

impl AlgorithmUnit for BinaryThreshold {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let (threshold, max_val) = (self.threshold, self.max_val);
        let binary = map_gray(&frame.to_gray(), |v| if v > threshold { max_val } else { 0 });
        Ok(Frame::from_gray_like(binary, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&BINARY.params, params, |name, v| {
            let v = v.as_i64().unwrap_or_default() as u8;
            match name {
                "threshold" => self.threshold = v,
                "maxVal" => self.max_val = v,
                _ => {}
            }
        });
    }

    fn parameters(&self) -> ParamMap {
        params! { "threshold" => self.threshold as u32, "maxVal" => self.max_val as u32 }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &BINARY
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

/// Otsu 自动阈值
#[derive(Clone, Debug, Default)]
pub struct OtsuThreshold {
    invert: bool,
}

impl OtsuThreshold {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlgorithmUnit for OtsuThreshold {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let level = otsu_level(&gray);
        let (hi, lo) = if self.invert { (0, 255) } else { (255, 0) };
        let binary = map_gray(&gray, |v| if v > level { hi } else { lo });
        Ok(Frame::from_gray_like(binary, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&OTSU.params, params, |name, v| {
            if name == "invert" {
                self.invert = v.as_bool().unwrap_or_default();
            }
        });
    }

    fn parameters(&self) -> ParamMap {
        params! { "invert" => self.invert }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &OTSU
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

/// 自适应阈值
#[derive(Clone, Debug)]
pub struct AdaptiveThreshold {
    block_size: u32,
    c: f64,
    method: i64,
    invert: bool,
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveThreshold {
    pub fn new() -> Self {
        Self {
            block_size: 11,
            c: 2.0,
            method: 0,
            invert: false,
        }
    }

    fn local_mean(&self, gray: &GrayImage) -> GrayImage {
        if self.method == 0 {
            let radius = self.block_size / 2;
            box_filter(gray, radius, radius)
        } else {
            gaussian_blur_f32(gray, sigma_for_kernel(self.block_size))
        }
    }
}

impl AlgorithmUnit for AdaptiveThreshold {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let mean = self.local_mean(&gray);
        let (hi, lo) = if self.invert { (0u8, 255u8) } else { (255u8, 0u8) };
        let binary: GrayImage = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            let src = gray.get_pixel(x, y)[0] as f64;
            let local = mean.get_pixel(x, y)[0] as f64 - self.c;
            Luma([if src > local { hi } else { lo }])
        });
        Ok(Frame::from_gray_like(binary, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&ADAPTIVE.params, params, |name, v| match name {
            "blockSize" => self.block_size = v.as_i64().unwrap_or(11) as u32,
            "C" => self.c = v.as_f64().unwrap_or(2.0),
            "method" => self.method = v.as_i64().unwrap_or_default(),
            "invert" => self.invert = v.as_bool().unwrap_or_default(),
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "blockSize" => self.block_size,
            "C" => self.c,
            "method" => self.method,
            "invert" => self.invert,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &ADAPTIVE
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}
