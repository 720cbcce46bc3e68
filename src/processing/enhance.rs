//! # 画质增强滤镜
//!
//! 放大流程使用的邻域滤镜集合。所有滤镜读取源缓冲、写出新缓冲，透明通道原样保留。
//!
//! 盒式均值统一走积分图，窗口在图像边界处截断，只对界内像素取平均。

use super::analyzer::edge_activity;
use super::buffer::{PixelBuffer, luma_of};

/// Lanczos 策略的补偿锐化强度。
pub const LANCZOS_COMPENSATION: f32 = 0.2;
/// 局部对比度：7×7 高通，混合 25%。
pub const LOCAL_CONTRAST_RADIUS: u32 = 3;
pub const LOCAL_CONTRAST_BLEND: f32 = 0.25;
/// 双边滤波：5×5，混合 30%。
pub const BILATERAL_RADIUS: u32 = 2;
pub const BILATERAL_BLEND: f32 = 0.3;
/// 细节增强：5×5 高通，混合 10%。
pub const DETAIL_RADIUS: u32 = 2;
pub const DETAIL_BLEND: f32 = 0.1;
/// 选择性平滑的梯度阈值。
pub const SMOOTHING_EDGE_THRESHOLD: f32 = 40.0;
/// 降噪：邻居与中心差异小于该值才参与平均。
pub const NOISE_SIMILARITY_THRESHOLD: f32 = 30.0;
/// 饱和度提升比例。
pub const COLOR_BOOST: f32 = 0.03;

/// 三通道积分图。
struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<[f64; 3]>,
}

impl IntegralImage {
    fn new(buffer: &PixelBuffer) -> Self {
        let (width, height) = (buffer.width() as usize, buffer.height() as usize);
        let stride = width + 1;
        let mut sums = vec![[0.0f64; 3]; stride * (height + 1)];
        let raw = buffer.as_raw();

        for y in 0..height {
            let mut row = [0.0f64; 3];
            for x in 0..width {
                let i = (y * width + x) * 4;
                for c in 0..3 {
                    row[c] += raw[i + c] as f64;
                    sums[(y + 1) * stride + x + 1][c] = sums[y * stride + x + 1][c] + row[c];
                }
            }
        }
        Self { width, height, sums }
    }

    /// `(2r+1)²` 窗口内界内像素的通道均值。
    fn mean(&self, x: u32, y: u32, radius: u32) -> [f32; 3] {
        let stride = self.width + 1;
        let x0 = (x as usize).saturating_sub(radius as usize);
        let y0 = (y as usize).saturating_sub(radius as usize);
        let x1 = (x as usize + radius as usize + 1).min(self.width);
        let y1 = (y as usize + radius as usize + 1).min(self.height);
        let area = ((x1 - x0) * (y1 - y0)) as f64;

        let mut mean = [0.0f32; 3];
        for (c, value) in mean.iter_mut().enumerate() {
            let sum = self.sums[y1 * stride + x1][c] - self.sums[y0 * stride + x1][c] - self.sums[y1 * stride + x0][c]
                + self.sums[y0 * stride + x0][c];
            *value = (sum / area) as f32;
        }
        mean
    }
}

#[inline]
fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// `p + amount × (p − 盒式均值)`，即按 `radius` 做高通后回加。
fn high_pass_boost(buffer: &PixelBuffer, radius: u32, amount: f32) -> PixelBuffer {
    let integral = IntegralImage::new(buffer);
    let mut output = buffer.clone();
    let (width, height) = buffer.dimensions();
    for y in 0..height {
        for x in 0..width {
            let pixel = buffer.pixel(x, y);
            let mean = integral.mean(x, y, radius);
            let mut out = pixel;
            for c in 0..3 {
                let value = pixel[c] as f32;
                out[c] = to_u8(value + amount * (value - mean[c]));
            }
            output.set_pixel(x, y, out);
        }
    }
    output
}

/// 3×3 反锐化掩模。
pub fn unsharp_mask(buffer: &PixelBuffer, amount: f32) -> PixelBuffer {
    high_pass_boost(buffer, 1, amount)
}

/// 把 0–100 的锐化强度映射到 0.15–0.2 的系数。
pub fn sharpen_multiplier(sharpen_amount: u8) -> f32 {
    0.15 + 0.05 * (sharpen_amount.min(100) as f32 / 100.0)
}

/// 局部对比度增强（7×7 高通，混合 25%）。
pub fn local_contrast(buffer: &PixelBuffer) -> PixelBuffer {
    high_pass_boost(buffer, LOCAL_CONTRAST_RADIUS, LOCAL_CONTRAST_BLEND)
}

/// 细节增强（5×5 高通，混合 10%）。
pub fn enhance_details(buffer: &PixelBuffer) -> PixelBuffer {
    high_pass_boost(buffer, DETAIL_RADIUS, DETAIL_BLEND)
}

/// 双边滤波式伪影抑制：空间与颜色双重加权平均后按 30% 混合。
pub fn bilateral_filter(buffer: &PixelBuffer) -> PixelBuffer {
    const SIGMA_SPACE: f32 = 2.0;
    const SIGMA_COLOR: f32 = 25.0;

    let (width, height) = buffer.dimensions();
    let mut output = buffer.clone();
    let r = BILATERAL_RADIUS as i64;

    for y in 0..height {
        for x in 0..width {
            let center = buffer.pixel(x, y);
            let mut sum = [0.0f32; 3];
            let mut total_weight = 0.0f32;

            for dy in -r..=r {
                for dx in -r..=r {
                    let neighbor = buffer.pixel_clamped(x as i64 + dx, y as i64 + dy);
                    let spatial = ((dx * dx + dy * dy) as f32) / (2.0 * SIGMA_SPACE * SIGMA_SPACE);
                    let color_distance: f32 = (0..3)
                        .map(|c| {
                            let d = neighbor[c] as f32 - center[c] as f32;
                            d * d
                        })
                        .sum();
                    let range = color_distance / (2.0 * SIGMA_COLOR * SIGMA_COLOR);
                    let weight = (-(spatial + range)).exp();

                    for c in 0..3 {
                        sum[c] += neighbor[c] as f32 * weight;
                    }
                    total_weight += weight;
                }
            }

            let mut out = center;
            for c in 0..3 {
                let filtered = sum[c] / total_weight;
                let original = center[c] as f32;
                out[c] = to_u8(original + (filtered - original) * BILATERAL_BLEND);
            }
            output.set_pixel(x, y, out);
        }
    }
    output
}

/// 选择性平滑：只对 3×3 梯度低于阈值的像素做均值，边缘像素保持不变。
pub fn selective_smoothing(buffer: &PixelBuffer) -> PixelBuffer {
    let integral = IntegralImage::new(buffer);
    let (width, height) = buffer.dimensions();
    let mut output = buffer.clone();

    for y in 0..height {
        for x in 0..width {
            if edge_activity(buffer, x, y) >= SMOOTHING_EDGE_THRESHOLD {
                continue;
            }
            let mean = integral.mean(x, y, 1);
            let mut out = buffer.pixel(x, y);
            for c in 0..3 {
                out[c] = to_u8(mean[c]);
            }
            output.set_pixel(x, y, out);
        }
    }
    output
}

/// 3×3 相似均值降噪：只有与中心差异小于阈值的邻居参与平均。
pub fn reduce_noise(buffer: &PixelBuffer) -> PixelBuffer {
    let (width, height) = buffer.dimensions();
    let mut output = buffer.clone();

    for y in 0..height {
        for x in 0..width {
            let center = buffer.pixel(x, y);
            let mut sum = [0.0f32; 3];
            let mut count = 0.0f32;

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let neighbor = buffer.pixel_clamped(x as i64 + dx, y as i64 + dy);
                    let difference = (0..3)
                        .map(|c| neighbor[c].abs_diff(center[c]) as f32)
                        .sum::<f32>()
                        / 3.0;
                    if difference < NOISE_SIMILARITY_THRESHOLD {
                        for c in 0..3 {
                            sum[c] += neighbor[c] as f32;
                        }
                        count += 1.0;
                    }
                }
            }

            let mut out = center;
            for c in 0..3 {
                out[c] = to_u8(sum[c] / count);
            }
            output.set_pixel(x, y, out);
        }
    }
    output
}

/// 保持亮度的饱和度提升（约 3%）。
pub fn boost_colors(buffer: &PixelBuffer) -> PixelBuffer {
    let mut output = buffer.clone();
    for pixel in output.as_raw_mut().chunks_exact_mut(4) {
        let luminance = luma_of(pixel[0], pixel[1], pixel[2]);
        for channel in pixel.iter_mut().take(3) {
            let value = *channel as f32;
            *channel = to_u8(luminance + (value - luminance) * (1.0 + COLOR_BOOST));
        }
    }
    output
}
