//! # 输出编码模块（Output Finalizer）
//!
//! ## 设计思路
//!
//! 把受管表面编码为目标格式，并在返回前释放表面（成功、失败两条路径都释放）。
//!
//! ## 实现思路
//!
//! - PNG：按质量选择压缩等级
//! - WebP：`image` 仅提供无损编码，质量参数只记录不生效
//! - JPEG：不含透明通道，先按 alpha 合成到白底再编码
//! - 编码结果为空时返回 `EncodingFailed`，不返回残缺数据

use std::io::Cursor;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::Serialize;

use super::buffer::PixelBuffer;
use super::governor::ResourceHandle;
use super::metrics::QualityMetrics;
use super::options::{OutputFormat, normalized_quality};
use crate::error::ProcessingError;

/// 编码后的图片。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    #[serde(skip)]
    pub bytes: Bytes,
    pub format: OutputFormat,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
}

/// 一次处理的完整结果：编码图片与元数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub image: EncodedImage,
    /// 先是主策略，再是依次执行的后处理阶段。
    pub algorithms: Vec<String>,
    pub elapsed_ms: u64,
    pub metrics: Option<QualityMetrics>,
    pub source_dimensions: (u32, u32),
    pub completed_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// 元数据 JSON（不含图片字节）。
    pub fn metadata_json(&self) -> Result<String, ProcessingError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ProcessingError::EncodingFailed(format!("结果元数据序列化失败：{}", e)))
    }
}

fn flatten_onto_white(buffer: &PixelBuffer) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(buffer.pixel_count() * 3);
    for pixel in buffer.as_raw().chunks_exact(4) {
        let alpha = pixel[3] as f32 / 255.0;
        for &channel in &pixel[..3] {
            let blended = channel as f32 * alpha + 255.0 * (1.0 - alpha);
            rgb.push(blended.round().clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

fn png_compression(quality: u8) -> CompressionType {
    match quality {
        0..=49 => CompressionType::Fast,
        50..=89 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// 把像素缓冲编码为目标格式。
pub fn encode(buffer: &PixelBuffer, format: OutputFormat, quality: u8) -> Result<EncodedImage, ProcessingError> {
    let (width, height) = buffer.dimensions();
    let mut cursor = Cursor::new(Vec::new());

    let result = match format {
        OutputFormat::Png => PngEncoder::new_with_quality(&mut cursor, png_compression(quality), FilterType::Adaptive)
            .write_image(buffer.as_raw(), width, height, ExtendedColorType::Rgba8),
        OutputFormat::Webp => {
            log::debug!("WebP 使用无损编码，忽略质量参数 {}", quality);
            WebPEncoder::new_lossless(&mut cursor).write_image(buffer.as_raw(), width, height, ExtendedColorType::Rgba8)
        }
        OutputFormat::Jpeg => {
            let jpeg_quality = (normalized_quality(quality) * 100.0).round() as u8;
            let rgb = flatten_onto_white(buffer);
            JpegEncoder::new_with_quality(&mut cursor, jpeg_quality).write_image(
                &rgb,
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
    };
    result.map_err(|e| ProcessingError::EncodingFailed(format!("{} 编码失败：{}", format.extension(), e)))?;

    let bytes = cursor.into_inner();
    if bytes.is_empty() {
        return Err(ProcessingError::EncodingFailed(format!(
            "{} 编码结果为空",
            format.extension()
        )));
    }

    Ok(EncodedImage {
        byte_len: bytes.len(),
        bytes: Bytes::from(bytes),
        format,
        mime_type: format.mime_type(),
        width,
        height,
    })
}

/// 编码受管表面并释放它。
pub fn finalize(handle: ResourceHandle, format: OutputFormat, quality: u8) -> Result<EncodedImage, ProcessingError> {
    let encoded = encode(handle.surface(), format, quality);
    handle.release();
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::config::GovernorConfig;
    use crate::processing::governor::ResourceGovernor;

    fn sample() -> PixelBuffer {
        let mut buffer = PixelBuffer::filled(16, 8, [30, 60, 90, 255]).expect("buffer");
        buffer.set_pixel(3, 3, [200, 10, 10, 0]);
        buffer
    }

    #[test]
    fn png_round_trips_pixels() {
        let encoded = encode(&sample(), OutputFormat::Png, 95).expect("encode");
        assert_eq!(encoded.mime_type, "image/png");
        assert_eq!(encoded.byte_len, encoded.bytes.len());

        let decoded = image::load_from_memory(&encoded.bytes).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.get_pixel(3, 3).0[3], 0);
    }

    #[test]
    fn webp_keeps_alpha() {
        let encoded = encode(&sample(), OutputFormat::Webp, 80).expect("encode");
        let decoded = image::load_from_memory(&encoded.bytes).expect("decode").to_rgba8();
        assert_eq!(decoded.get_pixel(3, 3).0[3], 0);
        assert_eq!(decoded.get_pixel(0, 0).0, [30, 60, 90, 255]);
    }

    #[test]
    fn jpeg_flattens_transparency_onto_white() {
        let buffer = PixelBuffer::filled(16, 16, [0, 0, 0, 0]).expect("buffer");
        let encoded = encode(&buffer, OutputFormat::Jpeg, 92).expect("encode");
        assert_eq!(encoded.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&encoded.bytes).expect("decode").to_rgb8();
        assert!(decoded.get_pixel(8, 8).0.iter().all(|&c| c > 245));
    }

    #[test]
    fn finalize_releases_handle() {
        let governor = ResourceGovernor::new(GovernorConfig::default());
        let mut handle = governor.acquire("finalize", 1, 1).expect("acquire");
        handle.replace_surface(sample());

        let encoded = finalize(handle, OutputFormat::Png, 90).expect("finalize");
        assert_eq!((encoded.width, encoded.height), (16, 8));
        assert_eq!(governor.active_count(), 0);
    }

    #[test]
    fn metadata_omits_image_bytes() {
        let result = ProcessingResult {
            image: encode(&sample(), OutputFormat::Png, 90).expect("encode"),
            algorithms: vec!["lanczos".to_string()],
            elapsed_ms: 12,
            metrics: None,
            source_dimensions: (16, 8),
            completed_at: Utc::now(),
        };
        let json = result.metadata_json().expect("json");
        assert!(json.contains("\"mimeType\": \"image/png\""));
        assert!(json.contains("\"elapsedMs\": 12"));
        assert!(!json.contains("\"bytes\""));
    }
}
