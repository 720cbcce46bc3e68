//! # 重采样模块
//!
//! ## 设计思路
//!
//! 所有尺寸变换（加载降采样、放大插值）统一走 `fast_image_resize`，
//! 它带 SIMD 加速并默认处理 alpha 预乘，避免透明边缘发黑。
//! 当 `fast_image_resize` 出错时回退到 `image::imageops::resize`，保证流程不中断。

use fast_image_resize as fr;
use image::imageops::FilterType;

use super::buffer::PixelBuffer;
use super::config::ResizeFilter;
use crate::error::ProcessingError;

/// 插值核。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleKernel {
    /// 最近邻，保留硬边（像素画）。
    Nearest,
    Bilinear,
    /// Catmull-Rom 三次卷积，即常说的 bicubic。
    Bicubic,
    Lanczos3,
}

impl From<ResizeFilter> for ResampleKernel {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => Self::Nearest,
            ResizeFilter::Bilinear => Self::Bilinear,
            ResizeFilter::CatmullRom => Self::Bicubic,
            ResizeFilter::Lanczos3 => Self::Lanczos3,
        }
    }
}

impl ResampleKernel {
    fn to_fast_alg(self) -> fr::ResizeAlg {
        match self {
            Self::Nearest => fr::ResizeAlg::Nearest,
            Self::Bilinear => fr::ResizeAlg::Convolution(fr::FilterType::Bilinear),
            Self::Bicubic => fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom),
            Self::Lanczos3 => fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3),
        }
    }

    fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 将缓冲重采样到 `target_width × target_height`。
pub fn resize(
    buffer: &PixelBuffer,
    target_width: u32,
    target_height: u32,
    kernel: ResampleKernel,
) -> Result<PixelBuffer, ProcessingError> {
    if target_width == 0 || target_height == 0 {
        return Err(ProcessingError::RenderingUnavailable(format!(
            "目标尺寸无效：{}x{}",
            target_width, target_height
        )));
    }
    if buffer.dimensions() == (target_width, target_height) {
        return Ok(buffer.clone());
    }

    match resize_with_fast_image_resize(buffer, target_width, target_height, kernel) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 重采样失败，回退 image::imageops::resize：{}", err);
            let source = buffer.clone().into_rgba_image()?;
            let resized = image::imageops::resize(
                &source,
                target_width,
                target_height,
                kernel.to_image_filter(),
            );
            Ok(PixelBuffer::from_rgba_image(resized))
        }
    }
}

fn resize_with_fast_image_resize(
    buffer: &PixelBuffer,
    target_width: u32,
    target_height: u32,
    kernel: ResampleKernel,
) -> Result<PixelBuffer, ProcessingError> {
    let (src_width, src_height) = buffer.dimensions();
    let src_image = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        buffer.as_raw().to_vec(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| ProcessingError::RenderingUnavailable(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new().resize_alg(kernel.to_fast_alg());

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| ProcessingError::RenderingUnavailable(format!("fast_image_resize 执行失败：{}", e)))?;

    PixelBuffer::new(target_width, target_height, dst_image.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_upscale_keeps_hard_edges() {
        let mut buffer = PixelBuffer::filled(2, 1, [0, 0, 0, 255]).expect("buffer");
        buffer.set_pixel(1, 0, [255, 255, 255, 255]);

        let resized = resize(&buffer, 4, 2, ResampleKernel::Nearest).expect("resize");
        assert_eq!(resized.dimensions(), (4, 2));
        assert_eq!(resized.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(resized.pixel(3, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn bicubic_preserves_flat_color() {
        let buffer = PixelBuffer::filled(10, 10, [120, 60, 30, 255]).expect("buffer");
        let resized = resize(&buffer, 25, 25, ResampleKernel::Bicubic).expect("resize");
        assert_eq!(resized.dimensions(), (25, 25));
        let [r, g, b, a] = resized.pixel(12, 12);
        assert!(r.abs_diff(120) <= 1 && g.abs_diff(60) <= 1 && b.abs_diff(30) <= 1);
        assert_eq!(a, 255);
    }

    #[test]
    fn rejects_zero_target() {
        let buffer = PixelBuffer::filled(4, 4, [0, 0, 0, 255]).expect("buffer");
        assert!(resize(&buffer, 0, 4, ResampleKernel::Bilinear).is_err());
    }
}
