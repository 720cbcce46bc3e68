//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageProcessor` 只负责流程编排与配置管理，像素算法全部在各子模块中。
//! 对外只有两个入口：`remove_background` 与 `upscale`，各自有同步版本
//! （`*_blocking`）和基于 `spawn_blocking` 的异步版本。
//!
//! 背景移除：准入 → 读取 → 加载 → 分析 → 四张掩码 → 融合 → 写入透明度 → 编码
//! 放大：准入 → 读取 → 加载 → 分析 → 安全倍数 → 选择策略 → 放大 → 后处理 → 编码
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<ProcessorConfig>>` 支持运行时调整，单次请求使用同一份快照。
//! - `ResourceGovernor` 由调用方注入，进程内的所有处理器可以共享同一个管理器。
//! - 处理表面在入口处申请，之后所有提前返回都会经由 `Drop` 释放；
//!   异步调用方放弃等待时，后台任务仍会跑完并释放。
//! - 记录 `load/analyze/process/encode/total` 阶段耗时，便于性能诊断。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;

use super::analyzer::analyze;
use super::config::{PerformanceProfile, ProcessorConfig};
use super::finalize::{ProcessingResult, finalize};
use super::governor::ResourceGovernor;
use super::loader::{LoadConstraints, load, read_source};
use super::mask::{MaskWeights, apply_algorithm_hint, apply_alpha, fuse_masks, generate_masks};
use super::metrics::measure;
use super::options::{RemovalOptions, UpscaleOptions};
use super::progress::{ProgressCallback, ProgressReporter, ProgressStage};
use super::source::ImageSource;
use super::upscale::{ensure_worthwhile, plan_scale, post_process, select_strategy, upscale_with};
use crate::error::ProcessingError;

/// 图片处理器。
#[derive(Clone, Debug)]
pub struct ImageProcessor {
    config: Arc<RwLock<ProcessorConfig>>,
    governor: ResourceGovernor,
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl ImageProcessor {
    /// 使用给定配置与共享的资源管理器创建处理器。
    ///
    /// # 示例
    /// ```rust
    /// use pixel_core::processing::{ImageProcessor, ProcessorConfig, ResourceGovernor};
    ///
    /// let config = ProcessorConfig::default();
    /// let governor = ResourceGovernor::new(config.governor.clone());
    /// let processor = ImageProcessor::new(config, governor)?;
    /// assert_eq!(processor.governor().active_count(), 0);
    /// # Ok::<(), pixel_core::error::ProcessingError>(())
    /// ```
    pub fn new(config: ProcessorConfig, governor: ResourceGovernor) -> Result<Self, ProcessingError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            governor,
        })
    }

    /// 按配置中的 `governor` 段新建独享的资源管理器。
    pub fn with_own_governor(config: ProcessorConfig) -> Result<Self, ProcessingError> {
        let governor = ResourceGovernor::new(config.governor.clone());
        Self::new(config, governor)
    }

    pub fn governor(&self) -> &ResourceGovernor {
        &self.governor
    }

    /// 获取配置快照。
    pub fn config_snapshot(&self) -> Result<ProcessorConfig, ProcessingError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ProcessingError::RenderingUnavailable("配置读取锁已中毒".to_string()))
    }

    /// 整体替换配置，不影响进行中的处理。
    pub fn update_config(&self, config: ProcessorConfig) -> Result<(), ProcessingError> {
        config.validate()?;
        let mut current = self
            .config
            .write()
            .map_err(|_| ProcessingError::RenderingUnavailable("配置写入锁已中毒".to_string()))?;
        *current = config;
        log::info!("⚙️ 处理器配置已更新");
        Ok(())
    }

    /// 设置性能档位。
    pub fn set_performance_profile(&self, profile: PerformanceProfile) -> Result<(), ProcessingError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ProcessingError::RenderingUnavailable("配置写入锁已中毒".to_string()))?;
        config.apply_performance_profile(profile);

        log::info!(
            "⚙️ 已切换性能档位：{}（sample_stride={}, filter={:?}, removal_pixels={}）",
            profile.as_str(),
            config.sample_stride,
            config.downscale_filter,
            config.removal.max_working_pixels
        );
        Ok(())
    }

    pub fn get_performance_profile(&self) -> Result<PerformanceProfile, ProcessingError> {
        Ok(self.config_snapshot()?.infer_performance_profile())
    }
}

impl ImageProcessor {
    /// 背景移除（同步）。
    pub fn remove_background_blocking(
        &self,
        source: ImageSource,
        options: &RemovalOptions,
        progress: &ProgressReporter,
    ) -> Result<ProcessingResult, ProcessingError> {
        let total_start = Instant::now();
        options.validate()?;
        let config = self.config_snapshot()?;
        let limits = config.removal.clone();

        let mut handle = self.governor.acquire("remove-background", 1, 1)?;

        progress.report(ProgressStage::Load);
        let load_start = Instant::now();
        let raw = read_source(source, limits.max_file_size)?;
        let loaded = load(
            &raw.bytes,
            &LoadConstraints {
                limits,
                max_source_pixels: config.max_source_pixels,
                filter: config.downscale_filter,
            },
        )?;
        let source_hint = raw.source_hint;
        drop(raw);
        let source_dimensions = (loaded.source_width, loaded.source_height);
        handle.replace_surface(loaded.buffer);
        let load_ms = elapsed_ms(load_start);

        progress.report(ProgressStage::Analyze);
        let analyze_start = Instant::now();
        let analysis = apply_algorithm_hint(&analyze(handle.surface(), config.sample_stride), options.algorithm);
        let analyze_ms = elapsed_ms(analyze_start);

        progress.report(ProgressStage::Select);
        let weights = MaskWeights::for_analysis(&analysis);
        log::debug!("🎚️ 掩码权重：{:?}", weights);

        progress.report(ProgressStage::Process);
        let process_start = Instant::now();
        let masks = generate_masks(handle.surface(), &analysis, options.sensitivity);
        let fused = fuse_masks(&masks, &weights)?;
        log::debug!(
            "🎭 掩码前景占比 - 物体: {:.3} 边缘: {:.3} 颜色: {:.3} 位置: {:.3} 融合: {:.3}",
            masks.object.as_ref().map_or(0.0, |m| m.foreground_ratio()),
            masks.edge.as_ref().map_or(0.0, |m| m.foreground_ratio()),
            masks.color.as_ref().map_or(0.0, |m| m.foreground_ratio()),
            masks.position.as_ref().map_or(0.0, |m| m.foreground_ratio()),
            fused.foreground_ratio()
        );
        drop(masks);

        progress.report(ProgressStage::Enhance);
        apply_alpha(handle.surface_mut(), &fused, options.feather_edges, options.preserve_details)?;
        let process_ms = elapsed_ms(process_start);

        let mut algorithms = vec![
            format!("background-removal:{}", options.algorithm.as_str()),
            "object-mask".to_string(),
            "edge-mask".to_string(),
            "color-mask".to_string(),
            "position-mask".to_string(),
            "mask-fusion".to_string(),
        ];
        if options.feather_edges {
            algorithms.push("feather-edges".to_string());
        }
        if options.preserve_details {
            algorithms.push("preserve-details".to_string());
        }

        let encode_start = Instant::now();
        let image = finalize(handle, options.output_format, options.quality)?;
        let encode_ms = elapsed_ms(encode_start);
        progress.report(ProgressStage::Finalize);

        let total_ms = elapsed_ms(total_start);
        log::info!(
            "✅ 背景移除完成 - 来源: {} 尺寸: {}x{} → {}x{} 加载: {}ms 分析: {}ms 处理: {}ms 编码: {}ms 总计: {}ms",
            source_hint,
            source_dimensions.0,
            source_dimensions.1,
            image.width,
            image.height,
            load_ms,
            analyze_ms,
            process_ms,
            encode_ms,
            total_ms
        );

        Ok(ProcessingResult {
            image,
            algorithms,
            elapsed_ms: total_ms,
            metrics: None,
            source_dimensions,
            completed_at: Utc::now(),
        })
    }

    /// 放大（同步）。
    pub fn upscale_blocking(
        &self,
        source: ImageSource,
        options: &UpscaleOptions,
        progress: &ProgressReporter,
    ) -> Result<ProcessingResult, ProcessingError> {
        let total_start = Instant::now();
        options.validate()?;
        let config = self.config_snapshot()?;
        let limits = config.upscale.clone();

        let mut handle = self.governor.acquire("upscale", 1, 1)?;

        progress.report(ProgressStage::Load);
        let load_start = Instant::now();
        let raw = read_source(source, limits.max_file_size)?;
        let loaded = load(
            &raw.bytes,
            &LoadConstraints {
                limits,
                max_source_pixels: config.max_source_pixels,
                filter: config.downscale_filter,
            },
        )?;
        let source_hint = raw.source_hint;
        drop(raw);
        let source_dimensions = (loaded.source_width, loaded.source_height);
        handle.replace_surface(loaded.buffer);
        let load_ms = elapsed_ms(load_start);

        progress.report(ProgressStage::Analyze);
        let analyze_start = Instant::now();
        let analysis = analyze(handle.surface(), config.sample_stride);
        let analyze_ms = elapsed_ms(analyze_start);

        progress.report(ProgressStage::Select);
        let plan = plan_scale(
            source_dimensions.0,
            source_dimensions.1,
            options.scale_factor,
            &config.upscale_output,
            options.max_output_dimension,
        );
        ensure_worthwhile(&plan, config.upscale_output.min_effective_scale)?;
        let strategy = select_strategy(options.primary_algorithm, &analysis);
        log::info!(
            "📐 放大规划 - 原图: {}x{} 目标: {}x{} 请求: {:.2}x 有效: {:.3}x 策略: {}",
            plan.source_width,
            plan.source_height,
            plan.target_width,
            plan.target_height,
            plan.requested_scale,
            plan.effective_scale,
            strategy.as_str()
        );

        progress.report(ProgressStage::Process);
        let process_start = Instant::now();
        let upscaled = upscale_with(handle.surface(), plan.target_width, plan.target_height, strategy)?;

        progress.report(ProgressStage::Enhance);
        let (enhanced, stages) = post_process(upscaled, options);
        handle.replace_surface(enhanced);
        let process_ms = elapsed_ms(process_start);

        let metrics = measure(handle.surface(), config.sample_stride);
        log::debug!(
            "📈 质量指标 - 锐度: {:.2} 噪点: {:.4} 伪影: {:.4}",
            metrics.sharpness,
            metrics.noise_level,
            metrics.artifact_score
        );

        let mut algorithms = vec![strategy.as_str().to_string()];
        algorithms.extend(stages.iter().map(|stage| stage.to_string()));

        let encode_start = Instant::now();
        let image = finalize(handle, options.output_format, options.quality)?;
        let encode_ms = elapsed_ms(encode_start);
        progress.report(ProgressStage::Finalize);

        let total_ms = elapsed_ms(total_start);
        log::info!(
            "✅ 放大完成 - 来源: {} 尺寸: {}x{} → {}x{} 加载: {}ms 分析: {}ms 处理: {}ms 编码: {}ms 总计: {}ms",
            source_hint,
            source_dimensions.0,
            source_dimensions.1,
            image.width,
            image.height,
            load_ms,
            analyze_ms,
            process_ms,
            encode_ms,
            total_ms
        );

        Ok(ProcessingResult {
            image,
            algorithms,
            elapsed_ms: total_ms,
            metrics: Some(metrics),
            source_dimensions,
            completed_at: Utc::now(),
        })
    }
}

impl ImageProcessor {
    /// 背景移除（异步）。像素计算在阻塞线程池中执行。
    pub async fn remove_background(
        &self,
        source: ImageSource,
        options: RemovalOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<ProcessingResult, ProcessingError> {
        let processor = self.clone();
        tokio::task::spawn_blocking(move || {
            processor.remove_background_blocking(source, &options, &ProgressReporter::new(progress))
        })
        .await
        .map_err(|e| ProcessingError::RenderingUnavailable(format!("背景移除任务异常终止：{}", e)))?
    }

    /// 放大（异步）。
    pub async fn upscale(
        &self,
        source: ImageSource,
        options: UpscaleOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<ProcessingResult, ProcessingError> {
        let processor = self.clone();
        tokio::task::spawn_blocking(move || processor.upscale_blocking(source, &options, &ProgressReporter::new(progress)))
            .await
            .map_err(|e| ProcessingError::RenderingUnavailable(format!("放大任务异常终止：{}", e)))?
    }
}
