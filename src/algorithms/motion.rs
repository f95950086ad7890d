//! 运动检测: 帧差法 / 背景减除
//!
//! 两者都持有时序状态 (前一帧或背景模型). 首帧及 `reset` 之后只建立状态并原样返回输入.

use std::collections::BTreeMap;

use anyhow::Result;
use image::{GrayImage, ImageBuffer, Luma, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};
use once_cell::sync::Lazy;

use super::morphology::{morph_gray, KernelShape, MorphOp};
use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::{map_gray, Frame};
use crate::params;

static FRAME_DIFF: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::FRAME_DIFFERENCE,
        "帧差运动检测",
        "比较相邻两帧的差异检测运动区域",
        vec![
            ParameterSpec::int("threshold", "差异阈值", 30)
                .range(1.0, 255.0)
                .describe("像素差异超过该值视为运动"),
            ParameterSpec::int("dilateSize", "形态学核半径", 3)
                .range(0.0, 10.0)
                .describe("闭运算去噪的核半径, 0 表示不处理"),
            ParameterSpec::boolean("showMotionOnly", "仅显示运动掩码", false),
            ParameterSpec::boolean("reset", "重置", false).describe("清除缓存的前一帧"),
        ],
    )
});

static BACKGROUND: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::BACKGROUND_SUBTRACTION,
        "背景减除",
        "逐像素高斯背景模型, 分离前景运动目标",
        vec![
            ParameterSpec::int("history", "历史帧数", 500)
                .range(1.0, 10000.0)
                .describe("自动学习率对应的历史长度"),
            ParameterSpec::float("varThreshold", "方差阈值", 16.0)
                .range(0.0, 100.0)
                .describe("马氏距离平方超过该值判为前景"),
            ParameterSpec::boolean("detectShadows", "检测阴影", true).describe("阴影像素标记为 127"),
            ParameterSpec::boolean("showForegroundOnly", "仅显示前景", false),
            ParameterSpec::float("learningRate", "学习率", -1.0)
                .range(-1.0, 1.0)
                .describe("负值表示按历史帧数自动计算"),
            ParameterSpec::boolean("reset", "重置", false).describe("重置背景模型"),
        ],
    )
});

/// 运动掩码外轮廓 (膨胀减腐蚀)
fn outline(mask: &GrayImage) -> GrayImage {
    morph_gray(mask, MorphOp::Gradient, KernelShape::Rect, 3)
}

/// 帧差运动检测
#[derive(Clone, Debug)]
pub struct FrameDifference {
    threshold: u8,
    dilate_size: u32,
    show_motion_only: bool,
    previous: Option<GrayImage>,
}

impl Default for FrameDifference {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDifference {
    pub fn new() -> Self {
        Self {
            threshold: 30,
            dilate_size: 3,
            show_motion_only: false,
            previous: None,
        }
    }

    fn motion_mask(&self, previous: &GrayImage, current: &GrayImage) -> GrayImage {
        let threshold = self.threshold;
        let mask = ImageBuffer::from_fn(current.width(), current.height(), |x, y| {
            let diff = current.get_pixel(x, y)[0].abs_diff(previous.get_pixel(x, y)[0]);
            Luma([if diff > threshold { 255 } else { 0 }])
        });
        if self.dilate_size > 0 {
            morph_gray(&mask, MorphOp::Close, KernelShape::Ellipse, self.dilate_size * 2 + 1)
        } else {
            mask
        }
    }
}

impl AlgorithmUnit for FrameDifference {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let previous = match self.previous.replace(gray.clone()) {
            Some(prev) if prev.dimensions() == gray.dimensions() => prev,
            // 首帧或尺寸变化
            _ => return Ok(frame),
        };
        let mask = self.motion_mask(&previous, &gray);

        if self.show_motion_only {
            return Ok(Frame::from_gray_like(mask, &frame));
        }
        if frame.channels() == 3 {
            let mut rgb = frame.to_rgb();
            let edge = outline(&mask);
            for (x, y, p) in edge.enumerate_pixels() {
                if p[0] > 0 {
                    rgb.put_pixel(x, y, Rgb([0, 255, 0]));
                }
            }
            Ok(Frame::from(rgb))
        } else {
            let blended = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
                Luma([gray.get_pixel(x, y)[0].saturating_add(mask.get_pixel(x, y)[0] / 2)])
            });
            Ok(Frame::from(blended))
        }
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&FRAME_DIFF.params, params, |name, v| match name {
            "threshold" => self.threshold = v.as_i64().unwrap_or(30) as u8,
            "dilateSize" => self.dilate_size = v.as_i64().unwrap_or(3) as u32,
            "showMotionOnly" => self.show_motion_only = v.as_bool().unwrap_or_default(),
            "reset" if v.as_bool() == Some(true) => self.previous = None,
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "threshold" => self.threshold as u32,
            "dilateSize" => self.dilate_size,
            "showMotionOnly" => self.show_motion_only,
            "reset" => false,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &FRAME_DIFF
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

const INITIAL_VARIANCE: f32 = 15.0 * 15.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 5.0 * INITIAL_VARIANCE;
const SHADOW: u8 = 127;
const MIN_BLOB_AREA: u32 = 100;

/// 逐像素高斯背景模型
#[derive(Clone, Debug)]
struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    frames: u64,
}

impl BackgroundModel {
    fn new(gray: &GrayImage) -> Self {
        Self {
            width: gray.width(),
            height: gray.height(),
            mean: gray.pixels().map(|p| p[0] as f32).collect(),
            variance: vec![INITIAL_VARIANCE; gray.len()],
            frames: 1,
        }
    }
}

/// 背景减除
#[derive(Clone, Debug)]
pub struct BackgroundSubtractor {
    history: u32,
    var_threshold: f64,
    detect_shadows: bool,
    show_foreground_only: bool,
    learning_rate: f64,
    model: Option<BackgroundModel>,
}

impl Default for BackgroundSubtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundSubtractor {
    pub fn new() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            detect_shadows: true,
            show_foreground_only: false,
            learning_rate: -1.0,
            model: None,
        }
    }

    /// 前景掩码: 255 前景, 127 阴影, 0 背景; 同时更新模型
    fn apply(&self, model: &mut BackgroundModel, gray: &GrayImage) -> GrayImage {
        model.frames += 1;
        let alpha = if self.learning_rate < 0.0 {
            1.0 / model.frames.min(self.history as u64) as f32
        } else {
            self.learning_rate as f32
        };
        let var_threshold = self.var_threshold as f32;

        let mut mask = GrayImage::new(gray.width(), gray.height());
        for (i, (p, out)) in gray.pixels().zip(mask.pixels_mut()).enumerate() {
            let value = p[0] as f32;
            let mean = model.mean[i];
            let var = model.variance[i];
            let d = value - mean;
            let foreground = d * d > var_threshold * var;

            out[0] = if !foreground {
                0
            } else if self.detect_shadows && mean > 0.0 && (0.5..1.0).contains(&(value / mean)) {
                // 比背景暗但亮度比例在阴影区间内
                SHADOW
            } else {
                255
            };

            model.mean[i] = mean + alpha * d;
            model.variance[i] = (var + alpha * (d * d - var)).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }
        mask
    }

    /// 前景连通域外接矩形, 过滤小区域
    fn blobs(mask: &GrayImage) -> Vec<Rect> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        let mut bounds: BTreeMap<u32, (u32, u32, u32, u32, u32)> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            if label[0] == 0 {
                continue;
            }
            let b = bounds.entry(label[0]).or_insert((x, y, x, y, 0));
            b.0 = b.0.min(x);
            b.1 = b.1.min(y);
            b.2 = b.2.max(x);
            b.3 = b.3.max(y);
            b.4 += 1;
        }
        bounds
            .into_values()
            .filter(|b| b.4 > MIN_BLOB_AREA)
            .map(|(x0, y0, x1, y1, _)| Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0 + 1, y1 - y0 + 1))
            .collect()
    }
}

impl AlgorithmUnit for BackgroundSubtractor {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let mut model = match self.model.take() {
            Some(m) if (m.width, m.height) == gray.dimensions() => m,
            _ => {
                self.model = Some(BackgroundModel::new(&gray));
                return Ok(frame);
            }
        };
        let mask = self.apply(&mut model, &gray);
        self.model = Some(model);

        if self.show_foreground_only {
            return Ok(Frame::from_gray_like(mask, &frame));
        }
        // 去掉阴影后的前景
        let solid = map_gray(&mask, |v| if v > 200 { 255 } else { 0 });
        if frame.channels() == 3 {
            let mut rgb = frame.to_rgb();
            for rect in Self::blobs(&solid) {
                draw_hollow_rect_mut(&mut rgb, rect, Rgb([0, 255, 0]));
                if rect.width() > 2 && rect.height() > 2 {
                    let inner = Rect::at(rect.left() + 1, rect.top() + 1).of_size(rect.width() - 2, rect.height() - 2);
                    draw_hollow_rect_mut(&mut rgb, inner, Rgb([0, 255, 0]));
                }
            }
            Ok(Frame::from(rgb))
        } else {
            let blended = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
                let v = gray.get_pixel(x, y)[0] as f32 * 0.7 + solid.get_pixel(x, y)[0] as f32 * 0.3;
                Luma([v.round().min(255.0) as u8])
            });
            Ok(Frame::from(blended))
        }
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        let before = (self.history, self.var_threshold, self.detect_shadows);
        let mut reset = false;
        apply_params(&BACKGROUND.params, params, |name, v| match name {
            "history" => self.history = v.as_i64().unwrap_or(500) as u32,
            "varThreshold" => self.var_threshold = v.as_f64().unwrap_or(16.0),
            "detectShadows" => self.detect_shadows = v.as_bool().unwrap_or(true),
            "showForegroundOnly" => self.show_foreground_only = v.as_bool().unwrap_or_default(),
            "learningRate" => self.learning_rate = v.as_f64().unwrap_or(-1.0),
            "reset" => reset = v.as_bool().unwrap_or_default(),
            _ => {}
        });
        // 模型参数变化时重建背景
        if reset || before != (self.history, self.var_threshold, self.detect_shadows) {
            self.model = None;
        }
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "history" => self.history,
            "varThreshold" => self.var_threshold,
            "detectShadows" => self.detect_shadows,
            "showForegroundOnly" => self.show_foreground_only,
            "learningRate" => self.learning_rate,
            "reset" => false,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &BACKGROUND
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(offset: u32) -> Frame {
        Frame::from(GrayImage::from_fn(40, 40, |x, y| {
            let inside = (offset..offset + 12).contains(&x) && (10..22).contains(&y);
            Luma([if inside { 240 } else { 20 }])
        }))
    }

    #[test]
    fn test_first_frame_passthrough() {
        let mut unit = FrameDifference::new();
        let out = unit.process(square(5)).unwrap();
        assert_eq!(out.to_gray(), square(5).to_gray());
    }

    #[test]
    fn test_motion_mask_marks_moved_region() {
        let mut unit = FrameDifference::new();
        unit.set_parameters(&params! { "showMotionOnly" => true, "dilateSize" => 0 });
        unit.process(square(5)).unwrap();
        let mask = unit.process(square(15)).unwrap().to_gray();
        assert_eq!(mask.get_pixel(6, 15)[0], 255);
        assert_eq!(mask.get_pixel(1, 1)[0], 0);

        // 静止画面无运动
        let still = unit.process(square(15)).unwrap().to_gray();
        assert!(still.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_reset_clears_previous_frame() {
        let mut unit = FrameDifference::new();
        unit.set_parameters(&params! { "showMotionOnly" => true });
        unit.process(square(5)).unwrap();
        unit.set_parameters(&params! { "reset" => true });
        assert_eq!(unit.parameters()["reset"].as_bool(), Some(false));
        let out = unit.process(square(15)).unwrap();
        assert_eq!(out.to_gray(), square(15).to_gray());
    }

    #[test]
    fn test_clone_carries_previous_frame() {
        let mut unit = FrameDifference::new();
        unit.set_parameters(&params! { "showMotionOnly" => true, "dilateSize" => 0 });
        unit.process(square(5)).unwrap();
        let mut copy = unit.clone_unit();
        let mask = copy.process(square(15)).unwrap().to_gray();
        assert_eq!(mask.get_pixel(6, 15)[0], 255);
    }

    #[test]
    fn test_background_learns_static_scene() {
        let mut unit = BackgroundSubtractor::new();
        unit.set_parameters(&params! { "showForegroundOnly" => true });
        for _ in 0..5 {
            unit.process(square(5)).unwrap();
        }
        let mask = unit.process(square(5)).unwrap().to_gray();
        assert!(mask.pixels().all(|p| p[0] == 0));

        // 新出现的亮块判为前景
        let mask = unit.process(square(25)).unwrap().to_gray();
        assert_eq!(mask.get_pixel(30, 15)[0], 255);
    }

    #[test]
    fn test_background_shadow_marking() {
        let mut unit = BackgroundSubtractor::new();
        unit.set_parameters(&params! { "showForegroundOnly" => true, "learningRate" => 0.0 });
        unit.process(Frame::filled_gray(8, 8, 200)).unwrap();
        let mask = unit.process(Frame::filled_gray(8, 8, 120)).unwrap().to_gray();
        assert_eq!(mask.get_pixel(0, 0)[0], SHADOW);

        unit.set_parameters(&params! { "detectShadows" => false });
        unit.process(Frame::filled_gray(8, 8, 200)).unwrap();
        let mask = unit.process(Frame::filled_gray(8, 8, 120)).unwrap().to_gray();
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_background_blobs_filter_small_regions() {
        let mut mask = GrayImage::new(40, 40);
        for y in 5..20 {
            for x in 5..20 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask.put_pixel(35, 35, Luma([255]));
        let blobs = BackgroundSubtractor::blobs(&mask);
        assert_eq!(blobs.len(), 1);
        assert_eq!((blobs[0].left(), blobs[0].width()), (5, 15));
    }
}
