//! # 处理选项模块
//!
//! ## 设计思路
//!
//! 每次调用携带一份不可变的选项记录，字段名沿用前端的 camelCase 约定，
//! 可直接从 JSON 反序列化。处理开始前统一校验取值范围，越界即 `InvalidInput`。

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

/// 输出编码格式。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Webp => ImageFormat::WebP,
        }
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    pub fn parse(value: &str) -> Result<Self, ProcessingError> {
        match value.trim().to_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            other => Err(ProcessingError::InvalidInput(format!(
                "未知输出格式：{}（可选：png / jpeg / webp）",
                other
            ))),
        }
    }
}

/// 抠图主体类型偏好。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemovalAlgorithm {
    #[default]
    Auto,
    Portrait,
    Object,
    Animal,
}

impl RemovalAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Portrait => "portrait",
            Self::Object => "object",
            Self::Animal => "animal",
        }
    }
}

/// 放大算法。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpscaleAlgorithm {
    #[default]
    Auto,
    Lanczos,
    Bicubic,
    Esrgan,
    Waifu2x,
    Srcnn,
}

impl UpscaleAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Lanczos => "lanczos",
            Self::Bicubic => "bicubic",
            Self::Esrgan => "esrgan",
            Self::Waifu2x => "waifu2x",
            Self::Srcnn => "srcnn",
        }
    }
}

/// 背景移除选项。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RemovalOptions {
    pub algorithm: RemovalAlgorithm,
    /// 灵敏度，5–50。
    pub sensitivity: u32,
    pub feather_edges: bool,
    pub preserve_details: bool,
    pub output_format: OutputFormat,
    /// 输出质量，1–100。
    pub quality: u8,
}

impl Default for RemovalOptions {
    fn default() -> Self {
        Self {
            algorithm: RemovalAlgorithm::Auto,
            sensitivity: 25,
            feather_edges: true,
            preserve_details: true,
            output_format: OutputFormat::Png,
            quality: 95,
        }
    }
}

impl RemovalOptions {
    pub fn from_json(json: &str) -> Result<Self, ProcessingError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| ProcessingError::InvalidInput(format!("抠图选项解析失败：{}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ProcessingError> {
        if !(5..=50).contains(&self.sensitivity) {
            return Err(ProcessingError::InvalidInput(format!(
                "sensitivity 必须在 5~50 之间（当前：{}）",
                self.sensitivity
            )));
        }
        validate_quality(self.quality)?;
        if !self.output_format.supports_alpha() {
            return Err(ProcessingError::InvalidInput(
                "背景移除仅支持 png / webp 输出（jpeg 不含透明通道）".to_string(),
            ));
        }
        Ok(())
    }
}

/// 放大选项。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UpscaleOptions {
    /// 请求倍数，1–3。
    pub scale_factor: f64,
    pub primary_algorithm: UpscaleAlgorithm,
    pub enhance_details: bool,
    pub reduce_noise: bool,
    /// 锐化强度，0–100。
    pub sharpen_amount: u8,
    pub color_enhancement: bool,
    pub output_format: OutputFormat,
    /// 输出质量，1–100。
    pub quality: u8,
    /// 输出单边上限，≤ 1536。
    pub max_output_dimension: u32,
}

impl Default for UpscaleOptions {
    fn default() -> Self {
        Self {
            scale_factor: 2.0,
            primary_algorithm: UpscaleAlgorithm::Auto,
            enhance_details: true,
            reduce_noise: true,
            sharpen_amount: 50,
            color_enhancement: true,
            output_format: OutputFormat::Png,
            quality: 92,
            max_output_dimension: 1536,
        }
    }
}

impl UpscaleOptions {
    pub fn from_json(json: &str) -> Result<Self, ProcessingError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| ProcessingError::InvalidInput(format!("放大选项解析失败：{}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ProcessingError> {
        if !self.scale_factor.is_finite() || !(1.0..=3.0).contains(&self.scale_factor) {
            return Err(ProcessingError::InvalidInput(format!(
                "scaleFactor 必须在 1~3 之间（当前：{}）",
                self.scale_factor
            )));
        }
        if self.sharpen_amount > 100 {
            return Err(ProcessingError::InvalidInput(format!(
                "sharpenAmount 必须在 0~100 之间（当前：{}）",
                self.sharpen_amount
            )));
        }
        if !(1..=1536).contains(&self.max_output_dimension) {
            return Err(ProcessingError::InvalidInput(format!(
                "maxOutputDimension 必须在 1~1536 之间（当前：{}）",
                self.max_output_dimension
            )));
        }
        validate_quality(self.quality)
    }
}

fn validate_quality(quality: u8) -> Result<(), ProcessingError> {
    if !(1..=100).contains(&quality) {
        return Err(ProcessingError::InvalidInput(format!(
            "quality 必须在 1~100 之间（当前：{}）",
            quality
        )));
    }
    Ok(())
}

/// 把 1–100 的质量映射为 `[0.1, 1.0]`。
pub fn normalized_quality(quality: u8) -> f32 {
    (quality as f32 / 100.0).clamp(0.1, 1.0)
}
