use anyhow::Result;
use once_cell::sync::Lazy;

use super::{ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap};
use crate::frame::Frame;

static ORIGINAL: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(ids::ORIGINAL, "原始图像", "不对图像进行任何处理, 保持原始状态", vec![])
});

static GRAYSCALE: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::GRAYSCALE,
        "灰度处理",
        "将图像转换为灰度模式, 输出通道数与输入一致",
        vec![],
    )
});

/// 原始图像 (直通)
#[derive(Clone, Debug, Default)]
pub struct Original;

impl Original {
    pub fn new() -> Self {
        Self
    }
}

impl AlgorithmUnit for Original {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        Ok(frame)
    }

    fn set_parameters(&mut self, _params: &ParamMap) {}

    fn parameters(&self) -> ParamMap {
        ParamMap::new()
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &ORIGINAL
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

/// 灰度处理
#[derive(Clone, Debug, Default)]
pub struct Grayscale;

impl Grayscale {
    pub fn new() -> Self {
        Self
    }
}

impl AlgorithmUnit for Grayscale {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() || frame.channels() == 1 {
            return Ok(frame);
        }
        Ok(Frame::from_gray_like(frame.to_gray(), &frame))
    }

    fn set_parameters(&mut self, _params: &ParamMap) {}

    fn parameters(&self) -> ParamMap {
        ParamMap::new()
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &GRAYSCALE
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_grayscale_equalizes_channels() {
        let frame = Frame::from(RgbImage::from_pixel(3, 3, Rgb([200, 10, 60])));
        let out = Grayscale::new().process(frame).unwrap();
        assert_eq!(out.channels(), 3);
        let px = out.to_rgb().get_pixel(1, 1).0;
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn test_original_is_identity() {
        let frame = Frame::filled_gray(4, 4, 9);
        let out = Original::new().process(frame.clone()).unwrap();
        assert_eq!(out.to_gray(), frame.to_gray());
    }
}
