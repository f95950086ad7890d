//! HSV 颜色提取

use anyhow::Result;
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use once_cell::sync::Lazy;

use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static HSV: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::HSV_EXTRACTION,
        "HSV颜色提取",
        "在HSV颜色空间中提取指定范围内的颜色, hMin > hMax 时按色相环绕处理",
        vec![
            ParameterSpec::int("hMin", "色相最小值", 0).range(0.0, 180.0),
            ParameterSpec::int("hMax", "色相最大值", 15).range(0.0, 180.0),
            ParameterSpec::int("sMin", "饱和度最小值", 100).range(0.0, 255.0),
            ParameterSpec::int("sMax", "饱和度最大值", 255).range(0.0, 255.0),
            ParameterSpec::int("vMin", "亮度最小值", 100).range(0.0, 255.0),
            ParameterSpec::int("vMax", "亮度最大值", 255).range(0.0, 255.0),
            ParameterSpec::boolean("showMask", "显示掩码", false)
                .describe("显示二值掩码而不是提取的颜色"),
        ],
    )
});

/// RGB → HSV (H: 0-180, S/V: 0-255)
pub(crate) fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;
    let s = if v > 0.0 { diff / v * 255.0 } else { 0.0 };
    let mut h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }
    [(h / 2.0).round().min(180.0) as u8, s.round() as u8, v as u8]
}

/// HSV (H: 0-180) → RGB
pub(crate) fn hsv_to_rgb(hsv: [u8; 3]) -> [u8; 3] {
    let h = hsv[0] as f32 * 2.0;
    let s = hsv[1] as f32 / 255.0;
    let v = hsv[2] as f32 / 255.0;
    let c = v * s;
    let hp = (h / 60.0) % 6.0;
    let x = c * (1.0 - ((hp % 2.0) - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r, g, b].map(|ch| ((ch + m) * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// HSV 颜色提取
#[derive(Clone, Debug)]
pub struct HsvColorExtraction {
    h: (u8, u8),
    s: (u8, u8),
    v: (u8, u8),
    show_mask: bool,
}

impl Default for HsvColorExtraction {
    fn default() -> Self {
        Self::new()
    }
}

impl HsvColorExtraction {
    pub fn new() -> Self {
        // 默认提取红色范围
        Self {
            h: (0, 15),
            s: (100, 255),
            v: (100, 255),
            show_mask: false,
        }
    }

    fn in_range(&self, hsv: [u8; 3]) -> bool {
        let [h, s, v] = hsv;
        let hue_ok = if self.h.0 <= self.h.1 {
            h >= self.h.0 && h <= self.h.1
        } else {
            // 色相跨越 180/0 边界
            h <= self.h.1 || h >= self.h.0
        };
        hue_ok && s >= self.s.0 && s <= self.s.1 && v >= self.v.0 && v <= self.v.1
    }

    pub fn mask(&self, rgb: &RgbImage) -> GrayImage {
        ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
            let hit = self.in_range(rgb_to_hsv(rgb.get_pixel(x, y).0));
            Luma([if hit { 255 } else { 0 }])
        })
    }
}

impl AlgorithmUnit for HsvColorExtraction {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let rgb = frame.to_rgb();
        let mask = self.mask(&rgb);
        if self.show_mask {
            return Ok(Frame::from_gray_like(mask, &frame));
        }
        let extracted = ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
            if mask.get_pixel(x, y)[0] > 0 {
                *rgb.get_pixel(x, y)
            } else {
                Rgb([0, 0, 0])
            }
        });
        Ok(Frame::from_rgb_like(extracted, &frame))
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&HSV.params, params, |name, v| {
            let n = v.as_i64().unwrap_or_default() as u8;
            match name {
                "hMin" => self.h.0 = n,
                "hMax" => self.h.1 = n,
                "sMin" => self.s.0 = n,
                "sMax" => self.s.1 = n,
                "vMin" => self.v.0 = n,
                "vMax" => self.v.1 = n,
                "showMask" => self.show_mask = v.as_bool().unwrap_or_default(),
                _ => {}
            }
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "hMin" => self.h.0 as u32,
            "hMax" => self.h.1 as u32,
            "sMin" => self.s.0 as u32,
            "sMax" => self.s.1 as u32,
            "vMin" => self.v.0 as u32,
            "vMax" => self.v.1 as u32,
            "showMask" => self.show_mask,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &HSV
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}
