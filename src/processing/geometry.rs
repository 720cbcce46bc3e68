//! # 尺寸裁剪与几何工具
//!
//! ## 设计思路
//!
//! `clamp_dimensions` 是整条链路的内存闸门：加载、降采样、放大目标尺寸都经过它。
//! 它是纯函数，同样输入永远得到同样输出，且对自身输出再次调用不会改变结果。
//!
//! ## 实现思路
//!
//! 1. 已在限制内的尺寸原样返回
//! 2. 取“单边上限比例”与“像素上限比例开方”中较小者作为缩放比例
//! 3. 长边向下取整，短边按长边回推并四舍五入，最大限度保持宽高比
//! 4. 回推后若像素数仍超限，逐步收缩长边直到满足

/// 按单边上限与像素总数上限等比缩小尺寸。
///
/// 返回值满足 `max(w, h) <= max_dimension` 且 `w * h <= max_pixels`（限制本身小于 1 时除外，
/// 此时至少返回 1x1）。
pub fn clamp_dimensions(width: u32, height: u32, max_dimension: u32, max_pixels: u64) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let max_dimension = max_dimension.max(1);
    let max_pixels = max_pixels.max(1);

    let pixels = width as u64 * height as u64;
    if width <= max_dimension && height <= max_dimension && pixels <= max_pixels {
        return (width, height);
    }

    let (long, short) = if width >= height {
        (width, height)
    } else {
        (height, width)
    };

    let dimension_scale = max_dimension as f64 / long as f64;
    let pixel_scale = (max_pixels as f64 / pixels as f64).sqrt();
    let scale = dimension_scale.min(pixel_scale).min(1.0);

    // 吸收浮点误差，例如 3000 * (1024 / 3000) 不应落到 1023
    let mut new_long = ((long as f64 * scale + 1e-9).floor() as u32).clamp(1, max_dimension);
    let mut new_short = derive_short_side(new_long, long, short);

    while new_long > 1 && new_long as u64 * new_short as u64 > max_pixels {
        new_long -= 1;
        new_short = derive_short_side(new_long, long, short);
    }

    if width >= height {
        (new_long, new_short)
    } else {
        (new_short, new_long)
    }
}

fn derive_short_side(new_long: u32, long: u32, short: u32) -> u32 {
    let derived = (new_long as f64 * short as f64 / long as f64).round() as u32;
    derived.clamp(1, new_long)
}

/// 中心接近度权重：`1 - 到中心距离 / 最大距离`，径向对称，取值 `[0, 1]`。
#[derive(Debug, Clone, Copy)]
pub struct CenterWeight {
    cx: f32,
    cy: f32,
    max_distance: f32,
}

impl CenterWeight {
    pub fn new(width: u32, height: u32) -> Self {
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        let max_distance = (cx * cx + cy * cy).sqrt().max(f32::EPSILON);
        Self { cx, cy, max_distance }
    }

    #[inline]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        let dx = x as f32 - self.cx;
        let dy = y as f32 - self.cy;
        (1.0 - (dx * dx + dy * dy).sqrt() / self.max_distance).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limits_is_unchanged() {
        assert_eq!(clamp_dimensions(800, 600, 1536, 1_048_576), (800, 600));
    }

    #[test]
    fn dimension_limit_preserves_aspect() {
        let (w, h) = clamp_dimensions(4000, 2000, 1536, u64::MAX);
        assert_eq!((w, h), (1536, 768));
    }

    #[test]
    fn pixel_limit_applies_to_square_source() {
        let (w, h) = clamp_dimensions(3000, 3000, 4096, 1_048_576);
        assert!(w as u64 * h as u64 <= 1_048_576);
        assert_eq!(w, h);
        assert_eq!(w, 1024);
    }

    #[test]
    fn portrait_sources_clamp_the_height() {
        let (w, h) = clamp_dimensions(1000, 3000, 1536, u64::MAX);
        assert_eq!(h, 1536);
        assert_eq!(w, 512);
    }

    #[test]
    fn extreme_strip_never_collapses_below_one() {
        let (w, h) = clamp_dimensions(100_000, 1, 1536, 1_048_576);
        assert_eq!((w, h), (1536, 1));
    }

    #[test]
    fn center_weight_is_one_at_center_and_zero_at_corner() {
        let weight = CenterWeight::new(100, 100);
        assert!((weight.at(50, 50) - 1.0).abs() < 1e-6);
        assert!(weight.at(0, 0) < 1e-6);
    }
}
