//! 形态学操作 (腐蚀、膨胀、开/闭运算、梯度、顶帽、黑帽)
//!
//! 灰度形态学: 腐蚀取结构元素覆盖范围内最小值, 膨胀取最大值.
//! 彩色图逐通道处理, 越界像素不参与计算.

use anyhow::Result;
use image::{GrayImage, RgbImage};
use once_cell::sync::Lazy;

use super::{apply_params, ids, AlgorithmDescriptor, AlgorithmUnit, ParamMap, ParameterSpec};
use crate::frame::Frame;
use crate::params;

static MORPHOLOGY: Lazy<AlgorithmDescriptor> = Lazy::new(|| {
    AlgorithmDescriptor::new(
        ids::MORPHOLOGY,
        "形态学操作",
        "执行形态学操作 (腐蚀、膨胀、开运算、闭运算等)",
        vec![
            ParameterSpec::enumeration(
                "operation",
                "操作类型",
                0,
                &["腐蚀", "膨胀", "开运算", "闭运算", "梯度", "顶帽", "黑帽"],
            ),
            ParameterSpec::int("kernelSize", "核大小", 3)
                .range(1.0, 21.0)
                .odd()
                .describe("结构元素的大小"),
            ParameterSpec::enumeration("kernelShape", "核形状", 0, &["矩形", "十字形", "椭圆形"]),
            ParameterSpec::int("iterations", "迭代次数", 1).range(1.0, 10.0),
        ],
    )
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphOp {
    Erode,
    Dilate,
    Open,
    Close,
    Gradient,
    TopHat,
    BlackHat,
}

impl MorphOp {
    fn from_index(index: i64) -> Self {
        match index {
            1 => MorphOp::Dilate,
            2 => MorphOp::Open,
            3 => MorphOp::Close,
            4 => MorphOp::Gradient,
            5 => MorphOp::TopHat,
            6 => MorphOp::BlackHat,
            _ => MorphOp::Erode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelShape {
    Rect,
    Cross,
    Ellipse,
}

impl KernelShape {
    fn from_index(index: i64) -> Self {
        match index {
            1 => KernelShape::Cross,
            2 => KernelShape::Ellipse,
            _ => KernelShape::Rect,
        }
    }

    /// 结构元素偏移量列表
    pub fn offsets(&self, kernel_size: u32) -> Vec<(i32, i32)> {
        let r = (kernel_size / 2) as i32;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let inside = match self {
                    KernelShape::Rect => true,
                    KernelShape::Cross => dx == 0 || dy == 0,
                    KernelShape::Ellipse => {
                        r == 0 || {
                            let (fx, fy) = (dx as f32 / r as f32, dy as f32 / r as f32);
                            fx * fx + fy * fy <= 1.0
                        }
                    }
                };
                if inside {
                    offsets.push((dx, dy));
                }
            }
        }
        offsets
    }
}

/// 交错排列的 8 位像素平面
struct Plane {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u32,
}

impl Plane {
    fn extremum(&self, offsets: &[(i32, i32)], dilate: bool) -> Plane {
        let (w, h, c) = (self.width as i32, self.height as i32, self.channels as usize);
        let mut out = vec![0u8; self.data.len()];
        for y in 0..h {
            for x in 0..w {
                for ch in 0..c {
                    let mut acc = if dilate { u8::MIN } else { u8::MAX };
                    for &(dx, dy) in offsets {
                        let (sx, sy) = (x + dx, y + dy);
                        if sx < 0 || sy < 0 || sx >= w || sy >= h {
                            continue;
                        }
                        let v = self.data[((sy * w + sx) as usize) * c + ch];
                        acc = if dilate { acc.max(v) } else { acc.min(v) };
                    }
                    out[((y * w + x) as usize) * c + ch] = acc;
                }
            }
        }
        Plane { data: out, ..*self }
    }

    fn repeat(&self, offsets: &[(i32, i32)], dilate: bool, iterations: u32) -> Plane {
        let mut cur = self.extremum(offsets, dilate);
        for _ in 1..iterations {
            cur = cur.extremum(offsets, dilate);
        }
        cur
    }

    fn saturating_sub(&self, other: &Plane) -> Plane {
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a.saturating_sub(*b))
            .collect();
        Plane { data, ..*self }
    }
}

/// 单通道图像的一次形态学运算
pub(crate) fn morph_gray(gray: &GrayImage, op: MorphOp, shape: KernelShape, kernel_size: u32) -> GrayImage {
    let unit = Morphology {
        operation: op as i64,
        kernel_size,
        kernel_shape: shape as i64,
        iterations: 1,
    };
    let (width, height) = gray.dimensions();
    let src = Plane { data: gray.as_raw().clone(), width, height, channels: 1 };
    GrayImage::from_raw(width, height, unit.apply(&src).data).unwrap_or_else(|| gray.clone())
}

/// 形态学操作
#[derive(Clone, Debug)]
pub struct Morphology {
    operation: i64,
    kernel_size: u32,
    kernel_shape: i64,
    iterations: u32,
}

impl Default for Morphology {
    fn default() -> Self {
        Self::new()
    }
}

impl Morphology {
    pub fn new() -> Self {
        Self {
            operation: 0,
            kernel_size: 3,
            kernel_shape: 0,
            iterations: 1,
        }
    }

    fn apply(&self, src: &Plane) -> Plane {
        let offsets = KernelShape::from_index(self.kernel_shape).offsets(self.kernel_size);
        let it = self.iterations.max(1);
        match MorphOp::from_index(self.operation) {
            MorphOp::Erode => src.repeat(&offsets, false, it),
            MorphOp::Dilate => src.repeat(&offsets, true, it),
            MorphOp::Open => src.repeat(&offsets, false, it).repeat(&offsets, true, it),
            MorphOp::Close => src.repeat(&offsets, true, it).repeat(&offsets, false, it),
            MorphOp::Gradient => {
                let dilated = src.repeat(&offsets, true, it);
                dilated.saturating_sub(&src.repeat(&offsets, false, it))
            }
            MorphOp::TopHat => {
                let opened = src.repeat(&offsets, false, it).repeat(&offsets, true, it);
                src.saturating_sub(&opened)
            }
            MorphOp::BlackHat => {
                let closed = src.repeat(&offsets, true, it).repeat(&offsets, false, it);
                closed.saturating_sub(src)
            }
        }
    }
}

impl AlgorithmUnit for Morphology {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        if frame.is_empty() {
            return Ok(frame);
        }
        let (width, height) = (frame.width(), frame.height());
        if frame.channels() == 3 {
            let src = Plane { data: frame.to_rgb().into_raw(), width, height, channels: 3 };
            let out = self.apply(&src);
            let rgb = RgbImage::from_raw(width, height, out.data)
                .ok_or_else(|| anyhow::anyhow!("形态学输出尺寸不匹配"))?;
            Ok(Frame::from(rgb))
        } else {
            let src = Plane { data: frame.to_gray().into_raw(), width, height, channels: 1 };
            let out = self.apply(&src);
            let gray = GrayImage::from_raw(width, height, out.data)
                .ok_or_else(|| anyhow::anyhow!("形态学输出尺寸不匹配"))?;
            Ok(Frame::from(gray))
        }
    }

    fn set_parameters(&mut self, params: &ParamMap) {
        apply_params(&MORPHOLOGY.params, params, |name, v| match name {
            "operation" => self.operation = v.as_i64().unwrap_or_default(),
            "kernelSize" => self.kernel_size = v.as_i64().unwrap_or(3) as u32,
            "kernelShape" => self.kernel_shape = v.as_i64().unwrap_or_default(),
            "iterations" => self.iterations = v.as_i64().unwrap_or(1) as u32,
            _ => {}
        });
    }

    fn parameters(&self) -> ParamMap {
        params! {
            "operation" => self.operation,
            "kernelSize" => self.kernel_size,
            "kernelShape" => self.kernel_shape,
            "iterations" => self.iterations,
        }
    }

    fn describe(&self) -> &AlgorithmDescriptor {
        &MORPHOLOGY
    }

    fn clone_unit(&self) -> Box<dyn AlgorithmUnit> {
        Box::new(self.clone())
    }
}
