//! # 放大流程（Upscaling Pipeline）
//!
//! ## 设计思路
//!
//! 1. **安全倍数**：请求倍数先截断到 3×，再按输出单边上限与像素总数上限等比收缩；
//!    收缩只降低有效倍数，不改变宽高比。有效倍数 < 1.1 时直接失败，不做“假放大”。
//! 2. **算法选择**：`auto` 时按内容分析选择策略，显式指定时直接采用。
//! 3. **后处理**：细节增强、降噪、锐化、色彩增强各自独立开关，顺序固定。
//!
//! ## 实现思路
//!
//! 有效倍数以**原始图片尺寸**为基准计算：加载阶段可能已把工作缓冲降到 1024 以内，
//! 但对调用方有意义的是“输出相对上传图片放大了多少”。
//! 插值本身统一走 `resize` 模块（`fast_image_resize`）。

use serde::Serialize;

use super::analyzer::{ContentAnalysis, ContentType, SHARP_EDGE_RATIO};
use super::buffer::PixelBuffer;
use super::config::UpscaleLimits;
use super::enhance;
use super::geometry::clamp_dimensions;
use super::options::{UpscaleAlgorithm, UpscaleOptions};
use super::resize::{ResampleKernel, resize};
use crate::error::ProcessingError;

/// 单次放大的尺寸规划。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalePlan {
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    /// 截断到 `[1, max_scale]` 后的请求倍数。
    pub requested_scale: f64,
    /// 实际生效倍数，始终 ≤ `requested_scale`。
    pub effective_scale: f64,
}

impl ScalePlan {
    pub fn target_pixels(&self) -> u64 {
        self.target_width as u64 * self.target_height as u64
    }
}

/// 计算安全的目标尺寸。
///
/// `max_output_dimension` 是调用方选项，与 `limits.max_output_dimension` 取较小者。
pub fn plan_scale(
    source_width: u32,
    source_height: u32,
    requested_scale: f64,
    limits: &UpscaleLimits,
    max_output_dimension: u32,
) -> ScalePlan {
    let width = source_width.max(1);
    let height = source_height.max(1);
    let requested = if requested_scale.is_finite() {
        requested_scale.clamp(1.0, limits.max_scale.max(1.0))
    } else {
        1.0
    };
    let max_dimension = max_output_dimension.min(limits.max_output_dimension).max(1);

    let scale = requested
        .min(max_dimension as f64 / width as f64)
        .min(max_dimension as f64 / height as f64)
        .min((limits.max_output_pixels as f64 / (width as f64 * height as f64)).sqrt());

    let target_width = ((width as f64 * scale + 1e-9).floor() as u32).max(1);
    let target_height = ((height as f64 * scale + 1e-9).floor() as u32).max(1);
    let (target_width, target_height) =
        clamp_dimensions(target_width, target_height, max_dimension, limits.max_output_pixels);

    let effective_scale = (target_width as f64 / width as f64)
        .min(target_height as f64 / height as f64)
        .min(requested);

    ScalePlan {
        source_width: width,
        source_height: height,
        target_width,
        target_height,
        requested_scale: requested,
        effective_scale,
    }
}

/// 有效倍数过小时返回 `ScaleTooSmall`。
pub fn ensure_worthwhile(plan: &ScalePlan, minimum: f64) -> Result<(), ProcessingError> {
    if plan.effective_scale < minimum {
        return Err(ProcessingError::ScaleTooSmall {
            effective: plan.effective_scale,
            minimum,
        });
    }
    Ok(())
}

/// 实际执行的放大策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpscaleStrategy {
    /// 平滑重采样 + 固定强度反锐化补偿。
    Lanczos,
    /// 多段 bicubic。
    MultiPassBicubic,
    /// bicubic + 局部对比度 + 双边滤波。
    Esrgan,
    /// 最近邻 + 选择性平滑。
    Waifu2x,
    /// bicubic + 细节增强 + 降噪。
    Srcnn,
}

impl UpscaleStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lanczos => "lanczos",
            Self::MultiPassBicubic => "bicubic-multipass",
            Self::Esrgan => "esrgan-style",
            Self::Waifu2x => "waifu2x-style",
            Self::Srcnn => "srcnn-style",
        }
    }
}

/// 按内容选择策略；显式指定算法时直接映射。
pub fn select_strategy(requested: UpscaleAlgorithm, analysis: &ContentAnalysis) -> UpscaleStrategy {
    match requested {
        UpscaleAlgorithm::Lanczos => UpscaleStrategy::Lanczos,
        UpscaleAlgorithm::Bicubic => UpscaleStrategy::MultiPassBicubic,
        UpscaleAlgorithm::Esrgan => UpscaleStrategy::Esrgan,
        UpscaleAlgorithm::Waifu2x => UpscaleStrategy::Waifu2x,
        UpscaleAlgorithm::Srcnn => UpscaleStrategy::Srcnn,
        UpscaleAlgorithm::Auto => {
            if analysis.is_pixel_art || analysis.content_type == ContentType::Art {
                UpscaleStrategy::Waifu2x
            } else if analysis.content_type == ContentType::Photo && analysis.has_compression_artifacts {
                UpscaleStrategy::Esrgan
            } else if analysis.content_type == ContentType::Text || analysis.edge_ratio > SHARP_EDGE_RATIO {
                UpscaleStrategy::Lanczos
            } else {
                UpscaleStrategy::MultiPassBicubic
            }
        }
    }
}

/// 多段放大的中间尺寸：倍数 > 2 时为 `sqrt(scale)` 倍，否则为 `None`。
///
/// 每条边都落在原尺寸与目标尺寸之间，与两者的大小关系无关。
pub fn intermediate_dimensions(
    (width, height): (u32, u32),
    (target_width, target_height): (u32, u32),
) -> Option<(u32, u32)> {
    let scale = (target_width as f64 / width as f64).max(target_height as f64 / height as f64);
    if scale <= 2.0 {
        return None;
    }
    let step = scale.sqrt();
    let between = |from: u32, to: u32| {
        let mid = (from as f64 * step).round() as u32;
        mid.clamp(from.min(to), from.max(to))
    };
    Some((between(width, target_width), between(height, target_height)))
}

/// 倍数 > 2 时先放大到 `sqrt(scale)` 的中间尺寸，再放大到目标尺寸。
pub fn multi_pass_bicubic(
    buffer: &PixelBuffer,
    target_width: u32,
    target_height: u32,
) -> Result<PixelBuffer, ProcessingError> {
    let (width, height) = buffer.dimensions();

    if let Some((mid_width, mid_height)) =
        intermediate_dimensions((width, height), (target_width, target_height))
    {
        log::debug!(
            "🔁 多段放大 - {}x{} → {}x{} → {}x{}",
            width,
            height,
            mid_width,
            mid_height,
            target_width,
            target_height
        );
        let intermediate = resize(buffer, mid_width, mid_height, ResampleKernel::Bicubic)?;
        return resize(&intermediate, target_width, target_height, ResampleKernel::Bicubic);
    }

    resize(buffer, target_width, target_height, ResampleKernel::Bicubic)
}

/// 用选定策略把缓冲放大到目标尺寸。
pub fn upscale_with(
    buffer: &PixelBuffer,
    target_width: u32,
    target_height: u32,
    strategy: UpscaleStrategy,
) -> Result<PixelBuffer, ProcessingError> {
    match strategy {
        UpscaleStrategy::Lanczos => {
            let smooth = resize(buffer, target_width, target_height, ResampleKernel::Lanczos3)?;
            Ok(enhance::unsharp_mask(&smooth, enhance::LANCZOS_COMPENSATION))
        }
        UpscaleStrategy::MultiPassBicubic => multi_pass_bicubic(buffer, target_width, target_height),
        UpscaleStrategy::Esrgan => {
            let base = multi_pass_bicubic(buffer, target_width, target_height)?;
            let contrasted = enhance::local_contrast(&base);
            Ok(enhance::bilateral_filter(&contrasted))
        }
        UpscaleStrategy::Waifu2x => {
            let nearest = resize(buffer, target_width, target_height, ResampleKernel::Nearest)?;
            Ok(enhance::selective_smoothing(&nearest))
        }
        UpscaleStrategy::Srcnn => {
            let base = multi_pass_bicubic(buffer, target_width, target_height)?;
            let detailed = enhance::enhance_details(&base);
            Ok(enhance::reduce_noise(&detailed))
        }
    }
}

/// 按选项依次执行后处理，返回处理后的缓冲与实际执行的阶段名。
pub fn post_process(buffer: PixelBuffer, options: &UpscaleOptions) -> (PixelBuffer, Vec<&'static str>) {
    let mut current = buffer;
    let mut stages = Vec::new();

    if options.enhance_details {
        current = enhance::enhance_details(&current);
        stages.push("detail-enhancement");
    }
    if options.reduce_noise {
        current = enhance::reduce_noise(&current);
        stages.push("noise-reduction");
    }
    if options.sharpen_amount > 0 {
        current = enhance::unsharp_mask(&current, enhance::sharpen_multiplier(options.sharpen_amount));
        stages.push("sharpen");
    }
    if options.color_enhancement {
        current = enhance::boost_colors(&current);
        stages.push("color-enhancement");
    }

    (current, stages)
}
