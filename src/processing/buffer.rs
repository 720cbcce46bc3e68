//! # 像素缓冲与掩码模型
//!
//! ## 设计思路
//!
//! - `PixelBuffer`：`width × height` 的 RGBA8 网格，由创建它的操作独占。
//! - `Mask`：同尺寸的单字节选择网格，`0` 表示前景保留，`255` 表示背景，中间值为过渡。
//!
//! 两者都在构造时校验长度不变式，后续所有像素循环可以放心按下标访问。

use image::{ImageBuffer, Rgba, RgbaImage};

use crate::error::ProcessingError;

/// 掩码中“前景保留”的取值。
pub const MASK_FOREGROUND: u8 = 0;
/// 掩码中“视为背景”的取值。
pub const MASK_BACKGROUND: u8 = 255;

/// RGBA8 像素缓冲。
///
/// 不变式：`data.len() == width * height * 4`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// 使用已有 RGBA 字节构建缓冲，长度不一致时返回 `InvalidInput`。
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ProcessingError> {
        let expected = Self::byte_len(width, height)?;
        if data.len() != expected {
            return Err(ProcessingError::InvalidInput(format!(
                "像素数据长度异常：{} 字节（期望：{} 字节，{}x{}）",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, data })
    }

    /// 以单一颜色填充创建缓冲。
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, ProcessingError> {
        let len = Self::byte_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / 4 {
            data.extend_from_slice(&rgba);
        }
        Ok(Self { width, height, data })
    }

    /// 计算 `width * height * 4`，溢出或零尺寸时报错。
    pub fn byte_len(width: u32, height: u32) -> Result<usize, ProcessingError> {
        if width == 0 || height == 0 {
            return Err(ProcessingError::InvalidInput(format!(
                "图片尺寸无效：{}x{}",
                width, height
            )));
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| {
                ProcessingError::InvalidInput(format!("图片尺寸导致内存溢出风险：{}x{}", width, height))
            })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// 越界坐标会被夹到最近的边缘像素。
    #[inline]
    pub fn pixel_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let cx = x.clamp(0, self.width as i64 - 1) as u32;
        let cy = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixel(cx, cy)
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    #[inline]
    pub fn set_alpha(&mut self, x: u32, y: u32, alpha: u8) {
        let i = self.index(x, y);
        self.data[i + 3] = alpha;
    }

    /// 三通道平均亮度。
    #[inline]
    pub fn brightness(&self, x: u32, y: u32) -> f32 {
        let [r, g, b, _] = self.pixel(x, y);
        (r as f32 + g as f32 + b as f32) / 3.0
    }

    /// Rec.601 亮度。
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        let [r, g, b, _] = self.pixel(x, y);
        luma_of(r, g, b)
    }

    /// 释放像素内存并把尺寸收缩到最小表面（1x1 透明像素）。
    pub(crate) fn shrink_to_minimum(&mut self) {
        self.width = 1;
        self.height = 1;
        self.data = vec![0; 4];
    }

    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    pub fn into_rgba_image(self) -> Result<RgbaImage, ProcessingError> {
        let (width, height) = (self.width, self.height);
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, self.data).ok_or_else(|| {
            ProcessingError::RenderingUnavailable("像素缓冲长度与尺寸不一致".to_string())
        })
    }
}

#[inline]
pub fn luma_of(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// 单字节前景/背景选择网格。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    pub fn new_filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ProcessingError> {
        if data.len() != width as usize * height as usize {
            return Err(ProcessingError::InvalidInput(format!(
                "掩码长度异常：{}（期望：{}）",
                data.len(),
                width as usize * height as usize
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        let i = y as usize * self.width as usize + x as usize;
        self.data[i] = value;
    }

    #[inline]
    pub fn is_background(&self, x: u32, y: u32) -> bool {
        self.get(x, y) > 128
    }

    /// 前景（取值 ≤ 128）像素占比。
    pub fn foreground_ratio(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&v| v <= 128).count();
        foreground as f64 / self.data.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_length_mismatch() {
        let result = PixelBuffer::new(2, 2, vec![0; 15]);
        assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
    }

    #[test]
    fn new_rejects_zero_dimensions() {
        assert!(matches!(
            PixelBuffer::new(0, 4, Vec::new()),
            Err(ProcessingError::InvalidInput(_))
        ));
    }

    #[test]
    fn pixel_clamped_reads_edges() {
        let mut buffer = PixelBuffer::filled(3, 3, [0, 0, 0, 255]).expect("buffer");
        buffer.set_pixel(0, 0, [9, 8, 7, 255]);
        assert_eq!(buffer.pixel_clamped(-5, -1), [9, 8, 7, 255]);
        assert_eq!(buffer.pixel_clamped(10, 10), [0, 0, 0, 255]);
    }

    #[test]
    fn shrink_to_minimum_keeps_invariant() {
        let mut buffer = PixelBuffer::filled(64, 32, [1, 2, 3, 4]).expect("buffer");
        buffer.shrink_to_minimum();
        assert_eq!(buffer.dimensions(), (1, 1));
        assert_eq!(buffer.as_raw().len(), 4);
    }

    #[test]
    fn mask_foreground_ratio_counts_low_values() {
        let mut mask = Mask::new_filled(2, 2, MASK_BACKGROUND);
        mask.set(0, 0, MASK_FOREGROUND);
        mask.set(1, 0, 128);
        assert!((mask.foreground_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
