//! 放大结果的质量指标，只用于观测，不参与流程控制。

use serde::Serialize;

use super::analyzer::{block_artifact_score, edge_activity, is_noise_pixel};
use super::buffer::PixelBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    /// 采样像素 3×3 最大梯度的平均值。
    pub sharpness: f64,
    /// 命中孤立噪点规则的采样像素占比。
    pub noise_level: f64,
    /// 8×8 块伪影得分。
    pub artifact_score: f64,
    pub sampled_pixels: usize,
}

pub fn measure(buffer: &PixelBuffer, stride: u32) -> QualityMetrics {
    let stride = stride.max(1) as usize;
    let (width, height) = buffer.dimensions();

    let mut samples = 0usize;
    let mut gradient_sum = 0.0f64;
    let mut noisy = 0usize;

    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            samples += 1;
            gradient_sum += edge_activity(buffer, x, y) as f64;
            if is_noise_pixel(buffer, x, y) {
                noisy += 1;
            }
        }
    }

    let denominator = samples.max(1) as f64;
    QualityMetrics {
        sharpness: gradient_sum / denominator,
        noise_level: noisy as f64 / denominator,
        artifact_score: block_artifact_score(buffer),
        sampled_pixels: samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_scores_zero() {
        let buffer = PixelBuffer::filled(32, 32, [70, 70, 70, 255]).expect("buffer");
        let metrics = measure(&buffer, 3);
        assert_eq!(metrics.sharpness, 0.0);
        assert_eq!(metrics.noise_level, 0.0);
        assert_eq!(metrics.artifact_score, 0.0);
        assert_eq!(metrics.sampled_pixels, 11 * 11);
    }

    #[test]
    fn speckles_raise_noise_level() {
        let mut buffer = PixelBuffer::filled(30, 30, [70, 70, 70, 255]).expect("buffer");
        for y in (0..30).step_by(3) {
            for x in (0..30).step_by(3) {
                buffer.set_pixel(x, y, [220, 220, 220, 255]);
            }
        }
        let metrics = measure(&buffer, 3);
        // 首行首列的斑点与钳位后的自身相邻，不计为孤立噪点
        assert!(metrics.noise_level > 0.75);
        assert!(metrics.sharpness > 100.0);
    }
}
