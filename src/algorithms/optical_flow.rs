//! 块匹配光流
//!
//! 当前帧按 `blockSize` 划分网格, 每块在前一帧 `searchRadius` 范围内
//! 搜索绝对差之和 (SAD) 最小的位置, 得到块的位移向量.

use anyhow::Result;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use once_cell::sync::Lazy;

use super::color::hsv_to_rgb;
use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static OPTICAL_FLOW: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::OPTICAL_FLOW,
        "块匹配光流",
        "基于块匹配估计相邻帧之间的运动向量",
        vec![
            ParameterSpec::int("blockSize", "块大小", 16).range(4.0, 64.0),
            ParameterSpec::int("searchRadius", "搜索半径", 4)
                .range(1.0, 16.0)
                .describe("在前一帧中搜索的最大位移 (像素)"),
            ParameterSpec::enumeration("visualMode", "可视化模式", 0, &["色轮", "箭头", "幅度"]),
            ParameterSpec::boolean("reset", "重置", false),
        ],
    )
});

/// 单个块的位移
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockFlow {
    /// 块左上角
    pub x: u32,
    pub y: u32,
    pub dx: i32,
    pub dy: i32,
}

impl BlockFlow {
    pub fn magnitude(&self) -> f32 {
        ((self.dx * self.dx + self.dy * self.dy) as f32).sqrt()
    }
}

/// 块匹配光流
#[derive(Clone, Debug)]
pub struct BlockOpticalFlow {
    block_size: u32,
    search_radius: u32,
    visual_mode: i64,
    previous: Option<GrayImage>,
}

impl Default for BlockOpticalFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockOpticalFlow {
    pub fn new() -> Self {
        Self {
            block_size: 16,
            search_radius: 4,
            visual_mode: 0,
            previous: None,
        }
    }

    fn sad(&self, previous: &GrayImage, current: &GrayImage, x: u32, y: u32, ox: i64, oy: i64) -> u64 {
        let bs = self.block_size;
        let mut total = 0u64;
        for j in 0..bs {
            for i in 0..bs {
                let c = current.get_pixel(x + i, y + j)[0];
                let p = previous.get_pixel((x as i64 + ox) as u32 + i, (y as i64 + oy) as u32 + j)[0];
                total += c.abs_diff(p) as u64;
            }
        }
        total
    }

    /// 估计 `previous` → `current` 的块位移; 只处理完整的块
    pub fn estimate(&self, previous: &GrayImage, current: &GrayImage) -> Vec<BlockFlow> {
        let (w, h) = current.dimensions();
        let bs = self.block_size;
        let r = self.search_radius as i64;
        let mut flows = Vec::new();
        let mut y = 0;
        while y + bs <= h {
            let mut x = 0;
            while x + bs <= w {
                // 零位移优先, 其余位置须严格更优
                let mut best = (self.sad(previous, current, x, y, 0, 0), 0i64, 0i64);
                for oy in -r..=r {
                    for ox in -r..=r {
                        let (px, py) = (x as i64 + ox, y as i64 + oy);
                        if px < 0 || py < 0 || px + bs as i64 > w as i64 || py + bs as i64 > h as i64 {
                            continue;
                        }
                        let cost = self.sad(previous, current, x, y, ox, oy);
                        if cost < best.0 {
                            best = (cost, ox, oy);
                        }
                    }
                }
                // 前一帧的 (x+o) 移动到当前帧的 x
                flows.push(BlockFlow { x, y, dx: -best.1 as i32, dy: -best.2 as i32 });
                x += bs;
            }
            y += bs;
        }
        flows
    }

    fn max_magnitude(flows: &[BlockFlow]) -> f32 {
        flows.iter().map(BlockFlow::magnitude).fold(0.0, f32::max)
    }

    /// 色相表示方向, 亮度表示幅度
    fn color_wheel(&self, flows: &[BlockFlow], width: u32, height: u32) -> RgbImage {
        let max = Self::max_magnitude(flows);
        let mut out = RgbImage::new(width, height);
        for f in flows {
            let angle = (f.dy as f32).atan2(f.dx as f32).to_degrees().rem_euclid(360.0);
            let value = if max > 0.0 { f.magnitude() / max * 255.0 } else { 0.0 };
            let colour = Rgb(hsv_to_rgb([(angle / 2.0) as u8, 255, value as u8]));
            for y in f.y..f.y + self.block_size {
                for x in f.x..f.x + self.block_size {
                    out.put_pixel(x, y, colour);
                }
            }
        }
        out
    }

    fn magnitude_map(&self, flows: &[BlockFlow], width: u32, height: u32) -> GrayImage {
        let max = Self::max_magnitude(flows);
        let mut out = GrayImage::new(width, height);
        for f in flows {
            let v = if max > 0.0 { (f.magnitude() / max * 255.0) as u8 } else { 0 };
            for y in f.y..f.y + self.block_size {
                for x in f.x..f.x + self.block_size {
                    out.put_pixel(x, y, Luma([v]));
                }
            }
        }
        out
    }

    fn arrows(&self, flows: &[BlockFlow], canvas: &mut RgbImage) {
        let half = self.block_size as f32 / 2.0;
        for f in flows.iter().filter(|f| f.dx != 0 || f.dy != 0) {
            let start = (f.x as f32 + half, f.y as f32 + half);
            // 放大位移便于观察
            let end = (start.0 + f.dx as f32 * 2.0, start.1 + f.dy as f32 * 2.0);
            draw_line_segment_mut(canvas, start, end, Rgb([0, 255, 0]));
            draw_filled_circle_mut(canvas, (end.0 as i32, end.1 as i32), 1, Rgb([255, 0, 0]));
        }
    }
}

impl AlgorithmUnit for BlockOpticalFlow {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let gray = frame.to_gray();
        let previous = match self.previous.replace(gray.clone()) {
            Some(prev) if prev.dimensions() == gray.dimensions() => prev,
            _ => return Ok(frame),
        };
        let flows = self.estimate(&previous, &gray);
        let (w, h) = gray.dimensions();
        tracing::trace!("光流: {} 块, 最大位移 {:.1}", flows.len(), Self::max_magnitude(&flows));

        let out = match self.visual_mode {
            0 => Frame::from_rgb_like(self.color_wheel(&flows, w, h), &frame),
            1 => {
                let mut canvas = frame.to_rgb();
                self.arrows(&flows, &mut canvas);
                Frame::from_rgb_like(canvas, &frame)
            }
            _ => Frame::from_gray_like(self.magnitude_map(&flows, w, h), &frame),
        };
        Ok(out)
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&OPTICAL_FLOW.params, params, |name, v| match name {
            "blockSize" => self.block_size = v.as_i64().unwrap_or(16) as u32,
            "searchRadius" => self.search_radius = v.as_i64().unwrap_or(4) as u32,
            "visualMode" => self.visual_mode = v.as_i64().unwrap_or_default(),
            "reset" if v.as_bool() == Some(true) => self.previous = None,
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "blockSize" => self.block_size,
            "searchRadius" => self.search_radius,
            "visualMode" => self.visual_mode,
            "reset" => false,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &OPTICAL_FLOW
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn texture(shift: u32) -> GrayImage {
        ImageBuffer::from_fn(64, 64, |x, y| {
            let (sx, y) = ((x + 64 - shift) as u64, y as u64);
            let v = ((sx * sx * 31) ^ (y * 97 + sx * y * 7)) % 251;
            Luma([v as u8])
        })
    }

    #[test]
    fn test_static_scene_has_zero_flow() {
        let unit = BlockOpticalFlow::new();
        let flows = unit.estimate(&texture(0), &texture(0));
        assert_eq!(flows.len(), 16);
        assert!(flows.iter().all(|f| f.dx == 0 && f.dy == 0));
    }

    #[test]
    fn test_detects_horizontal_shift() {
        let unit = BlockOpticalFlow::new();
        let flows = unit.estimate(&texture(0), &texture(3));
        // 左边界块缺少匹配源, 只检查内部块
        for f in flows.iter().filter(|f| f.x >= 16) {
            assert_eq!((f.dx, f.dy), (3, 0), "block ({}, {})", f.x, f.y);
        }
    }

    #[test]
    fn test_first_frame_and_reset() {
        let mut unit = BlockOpticalFlow::new();
        let first = Frame::from(texture(0));
        assert_eq!(unit.process(first.clone()).unwrap().to_gray(), first.to_gray());

        unit.set_parameters(&params! { "reset" => true, "visualMode" => "幅度" });
        assert_eq!(unit.parameters()["visualMode"].as_i64(), Some(2));
        let again = Frame::from(texture(3));
        assert_eq!(unit.process(again.clone()).unwrap().to_gray(), again.to_gray());

        // 第二帧起输出幅度图
        let out = unit.process(Frame::from(texture(3))).unwrap().to_gray();
        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_visual_modes_keep_channels() {
        for mode in 0..3 {
            let mut unit = BlockOpticalFlow::new();
            unit.set_parameters(&params! { "visualMode" => mode });
            unit.process(Frame::from(texture(0))).unwrap();
            let out = unit.process(Frame::from(texture(2))).unwrap();
            assert_eq!(out.channels(), 1);
            assert_eq!((out.width(), out.height()), (64, 64));
        }
    }
}
