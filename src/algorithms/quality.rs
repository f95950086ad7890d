//! 图像清晰度 (模糊) 检测
//!
//! 以拉普拉斯响应的方差衡量清晰度, 方差低于阈值判为模糊.
//! 结果以清晰度条绘制在帧左上角, 可选叠加分块清晰度热力图.

use anyhow::Result;
use image::{GrayImage, ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;

use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static BLUR_DETECTOR: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::BLUR_DETECTOR,
        "模糊检测",
        "基于拉普拉斯方差评估图像清晰度",
        vec![
            ParameterSpec::float("threshold", "模糊阈值", 100.0)
                .range(0.0, 10000.0)
                .describe("拉普拉斯方差低于该值判为模糊"),
            ParameterSpec::boolean("showHeatmap", "显示热力图", false),
            ParameterSpec::int("blockSize", "分块大小", 64)
                .range(16.0, 256.0)
                .describe("热力图分块边长"),
        ],
    )
});

const BAR: (i32, i32, u32, u32) = (10, 100, 200, 20);
/// 清晰度条满格对应的方差
const BAR_FULL_SCALE: f64 = 500.0;

/// 拉普拉斯方差 (3x3 四邻域核, 边界复制)
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w == 0 || h == 0 {
        return 0.0;
    }
    let at = |x: i64, y: i64| gray.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32)[0] as f64;
    let (mut sum, mut sum_sq) = (0.0, 0.0);
    for y in 0..h {
        for x in 0..w {
            let v = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += v;
            sum_sq += v * v;
        }
    }
    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// 0..1 映射为 jet 色带
fn jet(t: f32) -> [u8; 3] {
    let channel = |offset: f32| ((1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// 模糊检测
#[derive(Clone, Debug)]
pub struct BlurDetector {
    threshold: f64,
    show_heatmap: bool,
    block_size: u32,
}

impl Default for BlurDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BlurDetector {
    pub fn new() -> Self {
        Self {
            threshold: 100.0,
            show_heatmap: false,
            block_size: 64,
        }
    }

    pub fn is_blurry(&self, gray: &GrayImage) -> bool {
        laplacian_variance(gray) < self.threshold
    }

    /// 分块清晰度热力图 (jet 色带, 未覆盖区域为最小值)
    fn heatmap(&self, gray: &GrayImage) -> RgbImage {
        let (w, h) = gray.dimensions();
        let bs = self.block_size;
        let step = (bs / 2).max(1);
        let mut scores = vec![0f64; (w * h) as usize];
        let mut y = 0;
        while y + bs < h {
            let mut x = 0;
            while x + bs < w {
                let block = image::imageops::crop_imm(gray, x, y, bs, bs).to_image();
                let score = laplacian_variance(&block);
                for by in y..y + bs {
                    for bx in x..x + bs {
                        scores[(by * w + bx) as usize] = score;
                    }
                }
                x += step;
            }
            y += step;
        }
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        ImageBuffer::from_fn(w, h, |x, y| {
            let s = scores[(y * w + x) as usize];
            let t = if span > 0.0 { ((s - min) / span) as f32 } else { 0.0 };
            Rgb(jet(t))
        })
    }

    fn draw_bar(&self, rgb: &mut RgbImage, variance: f64, colour: bool) {
        let (bx, by, bw, bh) = BAR;
        let normalized = (variance / BAR_FULL_SCALE).min(1.0);
        let fill = (bw as f64 * normalized) as u32;
        let blurry = variance < self.threshold;

        let (bar_colour, border) = if colour {
            // 由红到绿渐变
            let bar = if normalized < 0.5 {
                Rgb([255, (normalized * 2.0 * 255.0) as u8, 0])
            } else {
                Rgb([((1.0 - normalized) * 2.0 * 255.0) as u8, 255, 0])
            };
            (bar, if blurry { Rgb([255, 0, 0]) } else { Rgb([0, 255, 0]) })
        } else {
            (Rgb([200, 200, 200]), Rgb([255, 255, 255]))
        };

        draw_filled_rect_mut(rgb, Rect::at(bx, by).of_size(bw, bh), Rgb([100, 100, 100]));
        if fill > 0 {
            draw_filled_rect_mut(rgb, Rect::at(bx, by).of_size(fill, bh), bar_colour);
        }
        draw_hollow_rect_mut(rgb, Rect::at(bx, by).of_size(bw, bh), border);
        draw_hollow_rect_mut(rgb, Rect::at(bx - 1, by - 1).of_size(bw + 2, bh + 2), border);
    }
}

impl AlgorithmUnit for BlurDetector {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let mut rgb = frame.to_rgb();

        if self.show_heatmap && self.block_size > 0 {
            let heat = self.heatmap(&gray);
            for (p, q) in rgb.pixels_mut().zip(heat.pixels()) {
                for c in 0..3 {
                    p[c] = ((p[c] as u16 + q[c] as u16) / 2) as u8;
                }
            }
        }

        let variance = laplacian_variance(&gray);
        tracing::trace!("清晰度 {:.2} (阈值 {:.2})", variance, self.threshold);
        self.draw_bar(&mut rgb, variance, frame.channels() == 3);
        Ok(Frame::from_rgb_like(rgb, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&BLUR_DETECTOR.params, params, |name, v| match name {
            "threshold" => self.threshold = v.as_f64().unwrap_or(100.0),
            "showHeatmap" => self.show_heatmap = v.as_bool().unwrap_or_default(),
            "blockSize" => self.block_size = v.as_i64().unwrap_or(64) as u32,
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "threshold" => self.threshold,
            "showHeatmap" => self.show_heatmap,
            "blockSize" => self.block_size,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &BLUR_DETECTOR
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}
