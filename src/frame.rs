//! 视频帧 (Frame)
//!
//! 二维像素缓冲区, 通道数为 1 (灰度) 或 3 (RGB), 元素深度 8/16 位整型或 32 位浮点.
//! 各处理阶段按值传递, 入队时转移所有权.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};

/// 像素元素深度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    U8,
    U16,
    F32,
}

#[derive(Clone, Debug)]
pub struct Frame {
    image: DynamicImage,
}

impl Default for Frame {
    fn default() -> Self {
        Self::empty()
    }
}

impl Frame {
    /// 规范化为 1 或 3 通道 (去掉 alpha)
    pub fn new(image: DynamicImage) -> Self {
        let image = match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgb32F(_) => image,
            DynamicImage::ImageLumaA8(_) => DynamicImage::ImageLuma8(image.to_luma8()),
            DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLuma16(image.to_luma16()),
            DynamicImage::ImageRgba16(_) => DynamicImage::ImageRgb16(image.to_rgb16()),
            DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgb32F(image.to_rgb32f()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        Self { image }
    }

    pub fn empty() -> Self {
        Self {
            image: DynamicImage::ImageLuma8(GrayImage::new(0, 0)),
        }
    }

    /// 纯色灰度帧
    pub fn filled_gray(width: u32, height: u32, value: u8) -> Self {
        Self::from(GrayImage::from_pixel(width, height, Luma([value])))
    }

    /// 以灰度计算结果重建帧, 通道数与 `like` 一致
    pub fn from_gray_like(gray: GrayImage, like: &Frame) -> Self {
        let image = DynamicImage::ImageLuma8(gray);
        if like.channels() == 3 {
            Self::from(image.to_rgb8())
        } else {
            Self { image }
        }
    }

    /// 以 RGB 计算结果重建帧, 通道数与 `like` 一致
    pub fn from_rgb_like(rgb: RgbImage, like: &Frame) -> Self {
        let image = DynamicImage::ImageRgb8(rgb);
        if like.channels() == 1 {
            Self::from(image.to_luma8())
        } else {
            Self { image }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn depth(&self) -> Depth {
        match &self.image {
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageRgb16(_) => Depth::U16,
            DynamicImage::ImageRgb32F(_) => Depth::F32,
            _ => Depth::U8,
        }
    }

    pub fn to_gray(&self) -> GrayImage {
        self.image.to_luma8()
    }

    pub fn to_rgb(&self) -> RgbImage {
        self.image.to_rgb8()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for Frame {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

impl From<GrayImage> for Frame {
    fn from(image: GrayImage) -> Self {
        Self {
            image: DynamicImage::ImageLuma8(image),
        }
    }
}

impl From<RgbImage> for Frame {
    fn from(image: RgbImage) -> Self {
        Self {
            image: DynamicImage::ImageRgb8(image),
        }
    }
}

/// 灰度图逐像素映射
pub(crate) fn map_gray(src: &GrayImage, f: impl Fn(u8) -> u8) -> GrayImage {
    ImageBuffer::from_fn(src.width(), src.height(), |x, y| Luma([f(src.get_pixel(x, y)[0])]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty();
        assert!(frame.is_empty());
        assert_eq!(frame.width(), 0);
        assert!(Frame::default().is_empty());
    }

    #[test]
    fn test_rgba_normalized_to_rgb() {
        let rgba = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
        let frame = Frame::new(DynamicImage::ImageRgba8(rgba));
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.depth(), Depth::U8);
        assert_eq!(frame.to_rgb().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_depth() {
        let frame = Frame::new(DynamicImage::new_luma16(2, 2));
        assert_eq!(frame.depth(), Depth::U16);
        assert_eq!(frame.channels(), 1);

        let frame = Frame::new(DynamicImage::new_rgb32f(2, 2));
        assert_eq!(frame.depth(), Depth::F32);
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn test_gray_like_keeps_channels() {
        let rgb = Frame::from(RgbImage::new(5, 5));
        let gray = GrayImage::from_pixel(5, 5, Luma([77]));
        let out = Frame::from_gray_like(gray.clone(), &rgb);
        assert_eq!(out.channels(), 3);
        assert_eq!(out.to_rgb().get_pixel(2, 2), &Rgb([77, 77, 77]));

        let mono = Frame::filled_gray(5, 5, 0);
        let out = Frame::from_gray_like(gray, &mono);
        assert_eq!(out.channels(), 1);
    }
}
