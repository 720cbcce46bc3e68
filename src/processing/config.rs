//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ProcessorConfig`，保证运行时行为可观测、可调整、可测试。
//! 抠图与放大两条流水线各自持有一份 `PipelineLimits`，体积与尺寸上限互不干扰。
//! 性能档位（quality / balanced / speed）作为高层语义，映射到底层参数组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供与浏览器端一致的安全上限（15MB / 25MB、1536px、1,048,576 像素）。
//! - 所有结构体支持 serde，缺省字段回落到默认值，便于从 JSON 注入。
//! - `apply_performance_profile` 只会在硬上限之内调整参数，不会放宽安全闸门。
//!
//! 所有阈值都是经验值，不是从模型推导出来的，换场景时可能需要重新调参。

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProcessingError;

/// 资源管理器配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// 同时在途的处理表面上限。
    pub max_concurrent: usize,
    /// 周期清扫间隔（毫秒）。
    pub sweep_interval_ms: u64,
    /// 超过该时长仍未释放的表面视为泄漏（毫秒）。
    pub stale_after_ms: u64,
    /// 堆内存占比超过该值时主动清理。
    pub memory_pressure_ratio: f64,
    /// 内存压力下使用的更短泄漏判定时长（毫秒）。
    pub pressure_stale_after_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            sweep_interval_ms: 30_000,
            stale_after_ms: 60_000,
            memory_pressure_ratio: 0.8,
            pressure_stale_after_ms: 5_000,
        }
    }
}

/// 单条流水线的输入上限。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineLimits {
    /// 原始字节体积上限。
    pub max_file_size: u64,
    /// 第一阶段（初次解码表面）单边上限。
    pub max_decode_dimension: u32,
    /// 第一阶段像素上限。
    pub max_decode_pixels: u64,
    /// 第二阶段（分析/掩码工作表面）单边上限。
    pub max_working_dimension: u32,
    /// 第二阶段像素上限（safe working pixel count）。
    pub max_working_pixels: u64,
    /// 按图片头估算的 RGBA 解码内存上限，同时作为解码器的分配上限。
    pub max_decoded_bytes: u64,
}

impl PipelineLimits {
    pub fn background_removal() -> Self {
        Self {
            max_file_size: 15 * 1024 * 1024,
            max_decode_dimension: 4096,
            max_decode_pixels: 16_777_216,
            max_working_dimension: 1536,
            max_working_pixels: 1_048_576,
            max_decoded_bytes: 128 * 1024 * 1024,
        }
    }

    pub fn upscale() -> Self {
        Self {
            max_file_size: 25 * 1024 * 1024,
            max_decode_dimension: 4096,
            max_decode_pixels: 16_777_216,
            max_working_dimension: 1024,
            max_working_pixels: 1_048_576,
            max_decoded_bytes: 128 * 1024 * 1024,
        }
    }
}

/// 配置文件中的部分覆盖项，未出现的字段沿用该流水线的默认值。
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelineLimitsOverride {
    max_file_size: Option<u64>,
    max_decode_dimension: Option<u32>,
    max_decode_pixels: Option<u64>,
    max_working_dimension: Option<u32>,
    max_working_pixels: Option<u64>,
    max_decoded_bytes: Option<u64>,
}

impl PipelineLimitsOverride {
    fn apply(self, base: PipelineLimits) -> PipelineLimits {
        PipelineLimits {
            max_file_size: self.max_file_size.unwrap_or(base.max_file_size),
            max_decode_dimension: self.max_decode_dimension.unwrap_or(base.max_decode_dimension),
            max_decode_pixels: self.max_decode_pixels.unwrap_or(base.max_decode_pixels),
            max_working_dimension: self.max_working_dimension.unwrap_or(base.max_working_dimension),
            max_working_pixels: self.max_working_pixels.unwrap_or(base.max_working_pixels),
            max_decoded_bytes: self.max_decoded_bytes.unwrap_or(base.max_decoded_bytes),
        }
    }
}

fn removal_limits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PipelineLimits, D::Error> {
    Ok(PipelineLimitsOverride::deserialize(deserializer)?.apply(PipelineLimits::background_removal()))
}

fn upscale_limits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PipelineLimits, D::Error> {
    Ok(PipelineLimitsOverride::deserialize(deserializer)?.apply(PipelineLimits::upscale()))
}

/// 放大输出上限。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpscaleLimits {
    pub max_scale: f64,
    pub max_output_dimension: u32,
    pub max_output_pixels: u64,
    /// 有效倍数低于该值时拒绝执行。
    pub min_effective_scale: f64,
}

impl Default for UpscaleLimits {
    fn default() -> Self {
        Self {
            max_scale: 3.0,
            max_output_dimension: 1536,
            max_output_pixels: 2_359_296,
            min_effective_scale: 1.1,
        }
    }
}

/// 降采样滤镜策略。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    Lanczos3,
}

/// 处理器总配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub governor: GovernorConfig,
    #[serde(deserialize_with = "removal_limits")]
    pub removal: PipelineLimits,
    #[serde(deserialize_with = "upscale_limits")]
    pub upscale: PipelineLimits,
    pub upscale_output: UpscaleLimits,
    /// 图片头声明的像素数上限，超过时在解码前直接拒绝。
    pub max_source_pixels: u64,
    /// 内容分析的采样步长（每隔 N 个像素取一个）。
    pub sample_stride: u32,
    /// 加载阶段降采样滤镜。
    pub downscale_filter: ResizeFilter,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            governor: GovernorConfig::default(),
            removal: PipelineLimits::background_removal(),
            upscale: PipelineLimits::upscale(),
            upscale_output: UpscaleLimits::default(),
            max_source_pixels: 100_000_000,
            sample_stride: 3,
            downscale_filter: ResizeFilter::CatmullRom,
        }
    }
}

/// 性能档位（面向产品/用户语义）。
///
/// - `Quality`：更密的采样、更好的降采样滤镜
/// - `Balanced`：默认
/// - `Speed`：稀疏采样、更小的工作表面
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl PerformanceProfile {
    /// 从外部字符串解析档位。
    pub fn parse(profile: &str) -> Result<Self, ProcessingError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ProcessingError::InvalidInput(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl ProcessorConfig {
    /// 从 JSON 读取配置，缺省字段使用默认值。
    pub fn from_json(json: &str) -> Result<Self, ProcessingError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProcessingError::InvalidInput(format!("配置解析失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ProcessingError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ProcessingError::InvalidInput(format!("配置序列化失败：{}", e)))
    }

    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.governor.max_concurrent == 0 {
            return Err(ProcessingError::InvalidInput("max_concurrent 不能为 0".to_string()));
        }
        if !(0.1..=1.0).contains(&self.governor.memory_pressure_ratio) {
            return Err(ProcessingError::InvalidInput(
                "memory_pressure_ratio 必须在 0.1~1.0 之间".to_string(),
            ));
        }
        if !(1..=8).contains(&self.sample_stride) {
            return Err(ProcessingError::InvalidInput("sample_stride 必须在 1~8 之间".to_string()));
        }
        for limits in [&self.removal, &self.upscale] {
            if limits.max_working_pixels > limits.max_decode_pixels
                || limits.max_working_dimension > limits.max_decode_dimension
            {
                return Err(ProcessingError::InvalidInput(
                    "工作表面上限不能大于解码表面上限".to_string(),
                ));
            }
            if limits.max_decoded_bytes < limits.max_working_pixels.saturating_mul(4) {
                return Err(ProcessingError::InvalidInput(
                    "max_decoded_bytes 不能小于工作表面所需内存".to_string(),
                ));
            }
        }
        if self.upscale_output.max_scale < 1.0 || self.upscale_output.min_effective_scale < 1.0 {
            return Err(ProcessingError::InvalidInput("放大倍数上下限必须 ≥ 1.0".to_string()));
        }
        Ok(())
    }

    /// 基于当前参数反推性能档位。
    pub fn infer_performance_profile(&self) -> PerformanceProfile {
        if self.sample_stride <= 2 && self.downscale_filter == ResizeFilter::Lanczos3 {
            return PerformanceProfile::Quality;
        }
        if self.sample_stride >= 4 {
            return PerformanceProfile::Speed;
        }
        PerformanceProfile::Balanced
    }

    /// 应用指定性能档位到实际参数。
    pub fn apply_performance_profile(&mut self, profile: PerformanceProfile) {
        let defaults = Self::default();
        match profile {
            PerformanceProfile::Quality => {
                self.sample_stride = 2;
                self.downscale_filter = ResizeFilter::Lanczos3;
                self.removal.max_working_pixels = defaults.removal.max_working_pixels;
                self.upscale.max_working_pixels = defaults.upscale.max_working_pixels;
            }
            PerformanceProfile::Balanced => {
                self.sample_stride = 3;
                self.downscale_filter = ResizeFilter::CatmullRom;
                self.removal.max_working_pixels = defaults.removal.max_working_pixels;
                self.upscale.max_working_pixels = defaults.upscale.max_working_pixels;
            }
            PerformanceProfile::Speed => {
                self.sample_stride = 4;
                self.downscale_filter = ResizeFilter::Bilinear;
                self.removal.max_working_pixels = 524_288;
                self.upscale.max_working_pixels = 524_288;
            }
        }
    }
}
