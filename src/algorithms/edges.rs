//! 边缘检测: Canny / Sobel

use anyhow::Result;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use once_cell::sync::Lazy;

use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static CANNY: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::CANNY,
        "边缘检测",
        "使用Canny算法检测图像边缘",
        vec![
            ParameterSpec::int("threshold1", "低阈值", 50)
                .range(0.0, 255.0)
                .describe("Canny边缘检测的低阈值"),
            ParameterSpec::int("threshold2", "高阈值", 150)
                .range(0.0, 255.0)
                .describe("Canny边缘检测的高阈值, 不小于低阈值"),
        ],
    )
});

static SOBEL: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::SOBEL,
        "Sobel边缘",
        "使用Sobel算子检测图像边缘",
        vec![
            ParameterSpec::float("scale", "缩放因子", 1.0).range(0.1, 10.0),
            ParameterSpec::float("delta", "增量", 0.0).range(-255.0, 255.0),
            ParameterSpec::enumeration("direction", "梯度方向", 2, &["X方向", "Y方向", "XY组合"]),
        ],
    )
});

/// Canny 边缘检测
#[derive(Clone, Debug)]
pub struct CannyEdges {
    threshold1: i64,
    threshold2: i64,
}

impl Default for CannyEdges {
    fn default() -> Self {
        Self::new()
    }
}

impl CannyEdges {
    pub fn new() -> Self {
        Self {
            threshold1: 50,
            threshold2: 150,
        }
    }
}

impl AlgorithmUnit for CannyEdges {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        // 阈值为 0 时边缘跟踪会越过图像边界
        let low = self.threshold1.max(1);
        let high = self.threshold2.max(low);
        let edges = canny(&frame.to_gray(), low as f32, high as f32);
        Ok(Frame::from_gray_like(edges, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        let (mut t1, mut t2) = (self.threshold1, self.threshold2);
        apply_params(&CANNY.params, params, |name, v| match name {
            "threshold1" => t1 = v.as_i64().unwrap_or(t1),
            "threshold2" => t2 = v.as_i64().unwrap_or(t2),
            _ => {}
        });
        if t2 < t1 {
            std::mem::swap(&mut t1, &mut t2);
        }
        self.threshold1 = t1;
        self.threshold2 = t2;
    }

    fn parameters(&self) -> ParamMap {
        params! { "threshold1" => self.threshold1, "threshold2" => self.threshold2 }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &CANNY
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

/// Sobel 梯度
#[derive(Clone, Debug)]
pub struct SobelEdges {
    scale: f64,
    delta: f64,
    direction: i64,
}

impl Default for SobelEdges {
    fn default() -> Self {
        Self::new()
    }
}

impl SobelEdges {
    pub fn new() -> Self {
        Self {
            scale: 1.0,
            delta: 0.0,
            direction: 2,
        }
    }

    /// |v * scale + delta| 饱和到 u8
    fn scale_abs(&self, grad: &ImageBuffer<Luma<i16>, Vec<i16>>) -> GrayImage {
        ImageBuffer::from_fn(grad.width(), grad.height(), |x, y| {
            let v = grad.get_pixel(x, y)[0] as f64 * self.scale + self.delta;
            Luma([v.abs().round().min(255.0) as u8])
        })
    }
}

impl AlgorithmUnit for SobelEdges {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let out = match self.direction {
            0 => self.scale_abs(&horizontal_sobel(&gray)),
            1 => self.scale_abs(&vertical_sobel(&gray)),
            _ => {
                let gx = self.scale_abs(&horizontal_sobel(&gray));
                let gy = self.scale_abs(&vertical_sobel(&gray));
                ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
                    let sum = gx.get_pixel(x, y)[0] as f32 * 0.5 + gy.get_pixel(x, y)[0] as f32 * 0.5;
                    Luma([sum.round() as u8])
                })
            }
        };
        Ok(Frame::from_gray_like(out, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&SOBEL.params, params, |name, v| match name {
            "scale" => self.scale = v.as_f64().unwrap_or(1.0),
            "delta" => self.delta = v.as_f64().unwrap_or_default(),
            "direction" => self.direction = v.as_i64().unwrap_or(2),
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! { "scale" => self.scale, "delta" => self.delta, "direction" => self.direction }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &SOBEL
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_edge() -> Frame {
        Frame::from(GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 0 } else { 255 }])))
    }

    #[test]
    fn test_canny_thresholds_swapped() {
        let mut unit = CannyEdges::new();
        unit.set_parameters(&params! { "threshold1" => 200, "threshold2" => 10 });
        let p = unit.parameters();
        assert_eq!(p["threshold1"].as_i64(), Some(10));
        assert_eq!(p["threshold2"].as_i64(), Some(200));
    }

    #[test]
    fn test_canny_finds_step_edge() {
        let out = CannyEdges::new().process(vertical_edge()).unwrap().to_gray();
        assert!(out.pixels().any(|p| p[0] == 255));
        assert_eq!(out.get_pixel(2, 10)[0], 0);
    }

    #[test]
    fn test_canny_zero_thresholds() {
        let mut unit = CannyEdges::new();
        unit.set_parameters(&params! { "threshold1" => 0, "threshold2" => 0 });
        assert_eq!(unit.parameters()["threshold1"].as_i64(), Some(0));

        let out = unit.process(vertical_edge()).unwrap().to_gray();
        assert_eq!(out.dimensions(), (20, 20));
        assert!(out.pixels().any(|p| p[0] == 255));

        let flat = unit.process(Frame::filled_gray(8, 8, 90)).unwrap().to_gray();
        assert!(flat.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_sobel_directions() {
        let mut unit = SobelEdges::new();
        unit.set_parameters(&params! { "direction" => 1 });
        let dy = unit.process(vertical_edge()).unwrap().to_gray();
        // 竖直边缘在Y方向无梯度
        assert!(dy.pixels().all(|p| p[0] == 0));

        unit.set_parameters(&params! { "direction" => 0 });
        let dx = unit.process(vertical_edge()).unwrap().to_gray();
        assert_eq!(dx.get_pixel(10, 10)[0], 255);
    }
}
