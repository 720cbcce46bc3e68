//! # 图片处理模块（processing）
//!
//! ## 设计思路
//!
//! 背景移除与放大两条流水线共用同一套基础设施，按职责拆分为多个子模块：
//!
//! - `buffer`：`PixelBuffer` / `Mask` 数据模型
//! - `geometry`：尺寸裁剪、中心接近度
//! - `governor`：资源管理（准入、RAII 释放、周期清扫）
//! - `source` / `loader`：来源读取、签名校验、解码与降采样
//! - `resize`：插值核（`fast_image_resize`，失败回退 `image`）
//! - `analyzer`：内容分析（肤色、纹理、边缘、伪影、内容类型）
//! - `mask`：四张掩码与加权融合、透明度写入与羽化
//! - `upscale` / `enhance`：安全倍数、策略选择、放大与增强滤镜
//! - `metrics`：放大结果质量指标
//! - `finalize`：编码输出与结果元数据
//! - `options` / `config` / `progress`：选项、配置、进度回报
//! - `handler`：统一编排，对外的两个入口
//!
//! ## 调用链
//!
//! ```text
//! 调用方（CLI / 宿主）
//!    ↓
//! handler.rs（配置快照 + 阶段耗时日志）
//!    ├─ governor.rs（准入，表面随 ResourceHandle 释放）
//!    ├─ loader.rs（体积 / 签名 / 像素上限 + 两阶段降采样）
//!    ├─ analyzer.rs
//!    ├─ mask.rs            （背景移除）
//!    ├─ upscale.rs + enhance.rs（放大）
//!    └─ finalize.rs（编码并释放表面）
//!    ↓
//! ProcessingResult / ProcessingError
//! ```

pub mod analyzer;
pub mod buffer;
pub mod config;
pub mod enhance;
pub mod finalize;
pub mod geometry;
pub mod governor;
mod handler;
pub mod loader;
pub mod mask;
pub mod metrics;
pub mod options;
pub mod progress;
pub mod resize;
mod source;
pub mod upscale;

pub use analyzer::{ContentAnalysis, ContentType, analyze};
pub use buffer::{MASK_BACKGROUND, MASK_FOREGROUND, Mask, PixelBuffer};
pub use config::{GovernorConfig, PerformanceProfile, PipelineLimits, ProcessorConfig, ResizeFilter, UpscaleLimits};
pub use finalize::{EncodedImage, ProcessingResult};
pub use geometry::clamp_dimensions;
pub use governor::{
    Clock, GovernorStats, HeapUsage, ManualClock, MemoryProbe, NoMemoryTelemetry, ResourceGovernor, ResourceHandle,
    SystemClock,
};
pub use handler::ImageProcessor;
pub use metrics::QualityMetrics;
pub use options::{OutputFormat, RemovalAlgorithm, RemovalOptions, UpscaleAlgorithm, UpscaleOptions};
pub use progress::{ProgressCallback, ProgressReporter, ProgressStage};
pub use source::ImageSource;
pub use upscale::{ScalePlan, UpscaleStrategy};
