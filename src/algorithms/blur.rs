//! 平滑滤波: 高斯模糊 / 中值模糊

use anyhow::Result;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use once_cell::sync::Lazy;

use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static GAUSSIAN: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::GAUSSIAN_BLUR,
        "高斯模糊",
        "使用高斯算法对图像进行平滑处理",
        vec![ParameterSpec::int("kernelSize", "内核大小", 15)
            .range(3.0, 99.0)
            .odd()
            .describe("高斯模糊的内核大小, 必须为奇数")],
    )
});

static MEDIAN: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::MEDIAN_BLUR,
        "中值模糊",
        "使用中值滤波器对图像进行模糊处理, 有效去除椒盐噪声",
        vec![ParameterSpec::int("kernelSize", "核大小", 5)
            .range(3.0, 31.0)
            .odd()
            .describe("中值滤波器的核大小 (必须为奇数)")],
    )
});

/// 由核大小推导高斯 sigma (与常见视觉库的自动 sigma 公式一致)
pub(crate) fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// 高斯模糊
#[derive(Clone, Debug)]
pub struct GaussianBlur {
    kernel_size: u32,
}

impl Default for GaussianBlur {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianBlur {
    pub fn new() -> Self {
        Self { kernel_size: 15 }
    }
}

impl AlgorithmUnit for GaussianBlur {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let sigma = sigma_for_kernel(self.kernel_size);
        let out = if frame.channels() == 3 {
            Frame::from(gaussian_blur_f32(&frame.to_rgb(), sigma))
        } else {
            Frame::from(gaussian_blur_f32(&frame.to_gray(), sigma))
        };
        Ok(out)
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&GAUSSIAN.params, params, |name, v| {
            if name == "kernelSize" {
                self.kernel_size = v.as_i64().unwrap_or(15) as u32;
            }
        });
    }

    fn parameters(&self) -> ParamMap {
        params! { "kernelSize" => self.kernel_size }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &GAUSSIAN
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

/// 中值模糊
#[derive(Clone, Debug)]
pub struct MedianBlur {
    kernel_size: u32,
}

impl Default for MedianBlur {
    fn default() -> Self {
        Self::new()
    }
}

impl MedianBlur {
    pub fn new() -> Self {
        Self { kernel_size: 5 }
    }
}

impl AlgorithmUnit for MedianBlur {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let radius = self.kernel_size / 2;
        let out = if frame.channels() == 3 {
            Frame::from(median_filter(&frame.to_rgb(), radius, radius))
        } else {
            Frame::from(median_filter(&frame.to_gray(), radius, radius))
        };
        Ok(out)
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&MEDIAN.params, params, |name, v| {
            if name == "kernelSize" {
                self.kernel_size = v.as_i64().unwrap_or(5) as u32;
            }
        });
    }

    fn parameters(&self) -> ParamMap {
        params! { "kernelSize" => self.kernel_size }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &MEDIAN
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_kernel_size_normalized_to_odd() {
        let mut blur = GaussianBlur::new();
        blur.set_parameters(&params! { "kernelSize" => 4 });
        assert_eq!(blur.parameters()["kernelSize"].as_i64(), Some(5));

        blur.set_parameters(&params! { "kernelSize" => 500 });
        assert_eq!(blur.parameters()["kernelSize"].as_i64(), Some(99));

        let mut median = MedianBlur::new();
        median.set_parameters(&params! { "kernelSize" => 32 });
        assert_eq!(median.parameters()["kernelSize"].as_i64(), Some(31));
    }

    #[test]
    fn test_median_removes_salt_noise() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([50]));
        img.put_pixel(4, 4, Luma([255]));
        let mut median = MedianBlur::new();
        median.set_parameters(&params! { "kernelSize" => 3 });
        let out = median.process(Frame::from(img)).unwrap();
        assert_eq!(out.to_gray().get_pixel(4, 4)[0], 50);
    }

    #[test]
    fn test_gaussian_smooths_step() {
        let img = GrayImage::from_fn(20, 1, |x, _| Luma([if x < 10 { 0 } else { 255 }]));
        let out = GaussianBlur::new().process(Frame::from(img)).unwrap().to_gray();
        let edge = out.get_pixel(10, 0)[0];
        assert!(edge > 0 && edge < 255);
    }

    #[test]
    fn test_sigma_for_kernel() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!(sigma_for_kernel(15) > sigma_for_kernel(5));
    }
}
