//! # pixel-core — 命令行入口
//!
//! 本文件只负责参数解析、日志初始化与结果落盘，处理逻辑全部在库中。

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pixel_core::error::ProcessingError;
use pixel_core::processing::{
    ImageProcessor, ImageSource, OutputFormat, PerformanceProfile, ProcessingResult, ProcessorConfig,
    ProgressCallback, RemovalAlgorithm, RemovalOptions, UpscaleAlgorithm, UpscaleOptions,
};

#[derive(Parser, Debug)]
#[command(name = "pixel-core")]
#[command(about = "🖼️ 本地背景移除与图片放大")]
struct Cli {
    /// JSON 配置文件（缺省字段使用默认值）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 性能档位：quality / balanced / speed
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 移除背景，输出带透明通道的图片
    RemoveBg {
        input: PathBuf,
        output: PathBuf,
        /// auto / portrait / object / animal
        #[arg(long, default_value = "auto")]
        algorithm: String,
        /// 5–50
        #[arg(long, default_value_t = 25)]
        sensitivity: u32,
        /// 羽化边缘（默认开启）
        #[arg(long, overrides_with = "no_feather")]
        feather: bool,
        #[arg(long, overrides_with = "feather")]
        no_feather: bool,
        /// 保留细节（默认开启）
        #[arg(long, overrides_with = "no_preserve_details")]
        preserve_details: bool,
        #[arg(long, overrides_with = "preserve_details")]
        no_preserve_details: bool,
        /// png / webp
        #[arg(long, default_value = "png")]
        format: String,
        #[arg(long, default_value_t = 95)]
        quality: u8,
    },
    /// 放大图片
    Upscale {
        input: PathBuf,
        output: PathBuf,
        /// 1–3
        #[arg(long, default_value_t = 2.0)]
        scale: f64,
        /// auto / lanczos / bicubic / esrgan / waifu2x / srcnn
        #[arg(long, default_value = "auto")]
        algorithm: String,
        #[arg(long)]
        no_details: bool,
        #[arg(long)]
        no_denoise: bool,
        /// 0–100
        #[arg(long, default_value_t = 50)]
        sharpen: u8,
        #[arg(long)]
        no_color: bool,
        #[arg(long, default_value_t = 1536)]
        max_dimension: u32,
        /// png / jpeg / webp
        #[arg(long, default_value = "png")]
        format: String,
        #[arg(long, default_value_t = 92)]
        quality: u8,
    },
}

fn parse_removal_algorithm(value: &str) -> Result<RemovalAlgorithm, ProcessingError> {
    match value.trim().to_lowercase().as_str() {
        "auto" => Ok(RemovalAlgorithm::Auto),
        "portrait" => Ok(RemovalAlgorithm::Portrait),
        "object" => Ok(RemovalAlgorithm::Object),
        "animal" => Ok(RemovalAlgorithm::Animal),
        other => Err(ProcessingError::InvalidInput(format!("未知抠图算法：{}", other))),
    }
}

fn parse_upscale_algorithm(value: &str) -> Result<UpscaleAlgorithm, ProcessingError> {
    match value.trim().to_lowercase().as_str() {
        "auto" => Ok(UpscaleAlgorithm::Auto),
        "lanczos" => Ok(UpscaleAlgorithm::Lanczos),
        "bicubic" => Ok(UpscaleAlgorithm::Bicubic),
        "esrgan" => Ok(UpscaleAlgorithm::Esrgan),
        "waifu2x" => Ok(UpscaleAlgorithm::Waifu2x),
        "srcnn" => Ok(UpscaleAlgorithm::Srcnn),
        other => Err(ProcessingError::InvalidInput(format!("未知放大算法：{}", other))),
    }
}

fn load_config(path: Option<&Path>, profile: Option<&str>) -> Result<ProcessorConfig, ProcessingError> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                ProcessingError::InvalidInput(format!("无法读取配置文件 '{}'：{}", path.display(), e))
            })?;
            ProcessorConfig::from_json(&json)?
        }
        None => ProcessorConfig::default(),
    };
    if let Some(profile) = profile {
        config.apply_performance_profile(PerformanceProfile::parse(profile)?);
    }
    Ok(config)
}

fn write_output(path: &Path, result: &ProcessingResult) -> Result<(), ProcessingError> {
    std::fs::write(path, &result.image.bytes).map_err(|e| {
        ProcessingError::EncodingFailed(format!("写入输出文件 '{}' 失败：{}", path.display(), e))
    })
}

async fn run(cli: Cli) -> Result<String, ProcessingError> {
    let config = load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let processor = ImageProcessor::with_own_governor(config)?;
    let sweeper = processor.governor().spawn_sweeper();

    let progress: ProgressCallback = Arc::new(|percent, stage| {
        log::info!("⏳ {:>3}% {}", percent, stage);
    });

    let outcome = match cli.command {
        Command::RemoveBg {
            input,
            output,
            algorithm,
            sensitivity,
            feather,
            no_feather,
            preserve_details,
            no_preserve_details,
            format,
            quality,
        } => {
            let options = RemovalOptions {
                algorithm: parse_removal_algorithm(&algorithm)?,
                sensitivity,
                feather_edges: feather || !no_feather,
                preserve_details: preserve_details || !no_preserve_details,
                output_format: OutputFormat::parse(&format)?,
                quality,
            };
            let result = processor
                .remove_background(ImageSource::FilePath(input), options, Some(progress))
                .await?;
            write_output(&output, &result)?;
            result
        }
        Command::Upscale {
            input,
            output,
            scale,
            algorithm,
            no_details,
            no_denoise,
            sharpen,
            no_color,
            max_dimension,
            format,
            quality,
        } => {
            let options = UpscaleOptions {
                scale_factor: scale,
                primary_algorithm: parse_upscale_algorithm(&algorithm)?,
                enhance_details: !no_details,
                reduce_noise: !no_denoise,
                sharpen_amount: sharpen,
                color_enhancement: !no_color,
                output_format: OutputFormat::parse(&format)?,
                quality,
                max_output_dimension: max_dimension,
            };
            let result = processor
                .upscale(ImageSource::FilePath(input), options, Some(progress))
                .await?;
            write_output(&output, &result)?;
            result
        }
    };

    sweeper.abort();
    outcome.metadata_json()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(metadata) => {
            println!("{}", metadata);
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("❌ 处理失败 [{}]：{}", err.code(), err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removal_flags(args: &[&str]) -> (bool, bool) {
        let cli = Cli::try_parse_from(args).expect("parse");
        match cli.command {
            Command::RemoveBg {
                feather,
                no_feather,
                preserve_details,
                no_preserve_details,
                ..
            } => (feather || !no_feather, preserve_details || !no_preserve_details),
            Command::Upscale { .. } => panic!("expected remove-bg"),
        }
    }

    #[test]
    fn removal_flags_are_bare_switches() {
        assert_eq!(removal_flags(&["pixel-core", "remove-bg", "in.png", "out.png"]), (true, true));
        assert_eq!(
            removal_flags(&["pixel-core", "remove-bg", "in.png", "out.png", "--feather", "--preserve-details"]),
            (true, true)
        );
        assert_eq!(
            removal_flags(&["pixel-core", "remove-bg", "in.png", "out.png", "--no-feather", "--no-preserve-details"]),
            (false, false)
        );
    }

    #[test]
    fn last_feather_switch_wins() {
        assert_eq!(
            removal_flags(&["pixel-core", "remove-bg", "in.png", "out.png", "--no-feather", "--feather"]),
            (true, true)
        );
    }
}
