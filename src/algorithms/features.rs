//! FAST 角点特征检测

use anyhow::Result;
use image::{Luma, Rgb};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, Canvas};
use once_cell::sync::Lazy;

use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static FAST: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::FAST_FEATURES,
        "FAST特征点",
        "使用FAST-9算法检测角点并在图像上标注",
        vec![
            ParameterSpec::int("threshold", "阈值", 20)
                .range(1.0, 100.0)
                .describe("中心像素与圆周像素的亮度差阈值"),
            ParameterSpec::int("maxFeatures", "最大特征点数", 500)
                .range(10.0, 5000.0)
                .describe("按响应强度保留的特征点数量上限"),
            ParameterSpec::enumeration("drawMode", "绘制方式", 1, &["点", "圆圈"]),
        ],
    )
});

/// FAST 特征点
#[derive(Clone, Debug)]
pub struct FastFeatures {
    threshold: u8,
    max_features: usize,
    draw_mode: i64,
}

impl Default for FastFeatures {
    fn default() -> Self {
        Self::new()
    }
}

impl FastFeatures {
    pub fn new() -> Self {
        Self {
            threshold: 20,
            max_features: 500,
            draw_mode: 1,
        }
    }

    /// 按响应强度降序, 最多 `maxFeatures` 个
    pub fn detect(&self, gray: &image::GrayImage) -> Vec<Corner> {
        let mut corners = corners_fast9(gray, self.threshold);
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(self.max_features);
        corners
    }

    fn draw<I>(&self, canvas: &mut I, corners: &[Corner], colour: I::Pixel)
    where
        I: Canvas,
    {
        for c in corners {
            let center = (c.x as i32, c.y as i32);
            if self.draw_mode == 0 {
                draw_filled_circle_mut(canvas, center, 2, colour);
            } else {
                draw_hollow_circle_mut(canvas, center, 5, colour);
            }
        }
    }
}

impl AlgorithmUnit for FastFeatures {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let corners = self.detect(&frame.to_gray());
        tracing::trace!("检测到 {} 个特征点", corners.len());
        if frame.channels() == 3 {
            let mut rgb = frame.to_rgb();
            self.draw(&mut rgb, &corners, Rgb([0, 255, 0]));
            Ok(Frame::from(rgb))
        } else {
            let mut gray = frame.to_gray();
            self.draw(&mut gray, &corners, Luma([255]));
            Ok(Frame::from(gray))
        }
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&FAST.params, params, |name, v| match name {
            "threshold" => self.threshold = v.as_i64().unwrap_or(20) as u8,
            "maxFeatures" => self.max_features = v.as_i64().unwrap_or(500) as usize,
            "drawMode" => self.draw_mode = v.as_i64().unwrap_or(1),
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "threshold" => self.threshold as u32,
            "maxFeatures" => self.max_features as u32,
            "drawMode" => self.draw_mode,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &FAST
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn bright_square() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            Luma([if (12..28).contains(&x) && (12..28).contains(&y) { 255 } else { 0 }])
        })
    }

    #[test]
    fn test_detects_square_corners() {
        let corners = FastFeatures::new().detect(&bright_square());
        assert!(!corners.is_empty());
        // 角点都在方块四角附近
        let square_corners = [(12i32, 12i32), (27, 12), (12, 27), (27, 27)];
        for c in &corners {
            let near = square_corners
                .iter()
                .any(|&(x, y)| (c.x as i32 - x).abs() <= 3 && (c.y as i32 - y).abs() <= 3);
            assert!(near, "({}, {})", c.x, c.y);
        }
    }

    #[test]
    fn test_max_features_limits_output() {
        let mut unit = FastFeatures::new();
        unit.set_parameters(&params! { "maxFeatures" => 1 });
        assert_eq!(unit.parameters()["maxFeatures"].as_i64(), Some(10));
        let corners = unit.detect(&bright_square());
        assert!(corners.len() <= 10);
        assert!(corners.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_flat_image_unchanged() {
        let input = Frame::filled_gray(30, 30, 90);
        let out = FastFeatures::new().process(input.clone()).unwrap();
        assert_eq!(out.to_gray(), input.to_gray());
    }
}
