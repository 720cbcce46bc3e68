//! # 加载与校验模块（Pixel Buffer Loader）
//!
//! ## 设计思路
//!
//! 统一处理不同来源（字节 / Base64 / 本地文件）的原始字节加载，并在“尽可能早”的阶段执行输入校验。
//! 目标是尽快失败：体积超限在解码前拒绝，像素数超限在读取图片头后、完整解码前拒绝。
//!
//! ## 实现思路
//!
//! 1. 来源读取：文件先看 metadata 体积，Base64 先估算解码后体积，再读取字节
//! 2. 签名校验：`infer` 识别 MIME，非图片类型直接 `InvalidInput`
//! 3. 读取图片头尺寸，按 `max_source_pixels` 与估算解码内存 `max_decoded_bytes` 快速拒绝
//! 4. 带分配上限解码，原地转换为 RGBA8
//! 5. 两阶段降采样：先压到解码表面上限，再压到安全工作像素数

use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

use super::buffer::PixelBuffer;
use super::config::{PipelineLimits, ResizeFilter};
use super::geometry::clamp_dimensions;
use super::resize::{self, ResampleKernel};
use super::source::{ImageSource, RawImageData};
use crate::error::ProcessingError;

/// 单次加载的约束。
#[derive(Debug, Clone)]
pub struct LoadConstraints {
    pub limits: PipelineLimits,
    /// 图片头声明像素数上限。
    pub max_source_pixels: u64,
    pub filter: ResizeFilter,
}

/// 加载结果：已降采样的工作缓冲与原图信息。
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub buffer: PixelBuffer,
    pub source_width: u32,
    pub source_height: u32,
    pub format: ImageFormat,
}

/// 从任意来源读取原始字节，超出 `max_file_size` 时返回 `FileTooLarge`。
pub(crate) fn read_source(source: ImageSource, max_file_size: u64) -> Result<RawImageData, ProcessingError> {
    match source {
        ImageSource::Bytes(bytes) => {
            ensure_within_file_limit(bytes.len() as u64, max_file_size)?;
            Ok(RawImageData {
                bytes,
                source_hint: "bytes",
            })
        }
        ImageSource::Base64(data) => {
            log::info!("📝 开始处理 base64 图片");
            let bytes = parse_base64_with_limit(&data, max_file_size)?;
            ensure_within_file_limit(bytes.len() as u64, max_file_size)?;
            Ok(RawImageData {
                bytes,
                source_hint: "base64",
            })
        }
        ImageSource::FilePath(path) => load_from_file(&path, max_file_size),
    }
}

fn load_from_file(path: &Path, max_file_size: u64) -> Result<RawImageData, ProcessingError> {
    log::info!("📁 开始读取本地图片 - 路径: {}", path.display());

    let metadata = std::fs::metadata(path).map_err(|e| {
        ProcessingError::InvalidInput(format!("无法读取文件信息 '{}'：{}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(ProcessingError::InvalidInput(format!("不是文件：{}", path.display())));
    }
    ensure_within_file_limit(metadata.len(), max_file_size)?;

    let bytes = std::fs::read(path).map_err(|e| {
        ProcessingError::InvalidInput(format!("无法读取图片文件 '{}'：{}", path.display(), e))
    })?;
    // 读取期间文件可能被追加
    ensure_within_file_limit(bytes.len() as u64, max_file_size)?;

    Ok(RawImageData {
        bytes,
        source_hint: "file",
    })
}

fn ensure_within_file_limit(actual: u64, limit: u64) -> Result<(), ProcessingError> {
    if actual > limit {
        return Err(ProcessingError::FileTooLarge { actual, limit });
    }
    Ok(())
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> u64 {
    let len = base64_data.trim().len() as u64;
    len.div_ceil(4).saturating_mul(3)
}

/// 解析 Base64 输入（支持 Data URL / 纯 Base64），解码前按估算体积拒绝。
fn parse_base64_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, ProcessingError> {
    let normalized = data.trim();

    let payload = if normalized.starts_with("data:") {
        if !normalized.starts_with("data:image/") {
            return Err(ProcessingError::InvalidInput("Data URL 不是图片类型".to_string()));
        }
        let base64_start = normalized
            .find(";base64,")
            .ok_or_else(|| ProcessingError::InvalidInput("缺少 base64 标记".to_string()))?;
        &normalized[base64_start + 8..]
    } else {
        normalized
    };

    let estimated_len = estimate_base64_decoded_upper_bound_len(payload);
    if estimated_len > max_file_size {
        return Err(ProcessingError::FileTooLarge {
            actual: estimated_len,
            limit: max_file_size,
        });
    }

    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ProcessingError::InvalidInput(format!("Base64 解码失败：{}", e)))
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
fn validate_image_signature(bytes: &[u8]) -> Result<&'static str, ProcessingError> {
    if bytes.is_empty() {
        return Err(ProcessingError::InvalidInput("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ProcessingError::UnsupportedFormat("无法识别文件类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ProcessingError::InvalidInput(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(kind.mime_type())
}

/// 将已读取的字节解码为受限尺寸的工作缓冲。
///
/// 保证：返回缓冲的像素数不超过 `limits.max_working_pixels`，宽高比在取整误差内与原图一致。
pub fn load(bytes: &[u8], constraints: &LoadConstraints) -> Result<LoadedImage, ProcessingError> {
    let limits = &constraints.limits;
    ensure_within_file_limit(bytes.len() as u64, limits.max_file_size)?;

    let mime = validate_image_signature(bytes)?;
    let format = image::guess_format(bytes)
        .map_err(|e| ProcessingError::UnsupportedFormat(format!("{}（{}）", mime, e)))?;

    let (header_width, header_height) = inspect_dimensions(bytes, format)?;
    let header_pixels = header_width as u64 * header_height as u64;
    if header_width == 0 || header_height == 0 {
        return Err(ProcessingError::DecodeFailed(format!(
            "图片尺寸无效：{}x{}",
            header_width, header_height
        )));
    }
    if header_pixels > constraints.max_source_pixels {
        return Err(ProcessingError::InvalidInput(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            header_pixels, constraints.max_source_pixels
        )));
    }

    ensure_within_decode_memory(header_width, header_height, limits.max_decoded_bytes)?;

    let decoded = decode_with_limits(bytes, format, limits.max_decoded_bytes)?;
    let (source_width, source_height) = decoded.dimensions();
    let kernel = ResampleKernel::from(constraints.filter);

    let mut buffer = PixelBuffer::from_rgba_image(decoded.into_rgba8());

    let (decode_width, decode_height) = clamp_dimensions(
        source_width,
        source_height,
        limits.max_decode_dimension,
        limits.max_decode_pixels,
    );
    if (decode_width, decode_height) != buffer.dimensions() {
        log::info!(
            "🧩 第一阶段降采样：{}x{} -> {}x{}",
            source_width,
            source_height,
            decode_width,
            decode_height
        );
        buffer = resize::resize(&buffer, decode_width, decode_height, kernel)?;
    }

    let (working_width, working_height) = clamp_dimensions(
        decode_width,
        decode_height,
        limits.max_working_dimension,
        limits.max_working_pixels,
    );
    if (working_width, working_height) != buffer.dimensions() {
        log::info!(
            "🧩 第二阶段降采样：{}x{} -> {}x{}（filter={:?}）",
            decode_width,
            decode_height,
            working_width,
            working_height,
            constraints.filter
        );
        buffer = resize::resize(&buffer, working_width, working_height, kernel)?;
    }

    log::info!(
        "✅ 图片解码成功 - 格式: {} 原始尺寸: {}x{} 工作尺寸: {}x{}",
        mime,
        source_width,
        source_height,
        buffer.width(),
        buffer.height()
    );

    Ok(LoadedImage {
        buffer,
        source_width,
        source_height,
        format,
    })
}

/// 按 RGBA8 估算完整解码所需内存，超过上限时在解码前拒绝。
fn ensure_within_decode_memory(width: u32, height: u32, max_decoded_bytes: u64) -> Result<(), ProcessingError> {
    let estimated = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| ProcessingError::InvalidInput("图片解码内存估算溢出".to_string()))?;

    if estimated > max_decoded_bytes {
        return Err(ProcessingError::InvalidInput(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }
    Ok(())
}

/// 通过 `ImageReader` 解码，解码器内部分配同样受 `max_decoded_bytes` 约束。
fn decode_with_limits(
    bytes: &[u8],
    format: ImageFormat,
    max_decoded_bytes: u64,
) -> Result<DynamicImage, ProcessingError> {
    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    let mut decoder_limits = image::Limits::default();
    decoder_limits.max_alloc = Some(max_decoded_bytes);
    reader.limits(decoder_limits);

    reader.decode().map_err(|e| match e {
        image::ImageError::Limits(limit) => {
            ProcessingError::InvalidInput(format!("图片解码超出内存上限：{}", limit))
        }
        other => ProcessingError::DecodeFailed(other.to_string()),
    })
}

/// 仅通过图片头信息读取宽高，用于完整解码前的像素限制检查。
fn inspect_dimensions(bytes: &[u8], format: ImageFormat) -> Result<(u32, u32), ProcessingError> {
    let mut reader = ImageReader::new(Cursor::new(bytes));
    reader.set_format(format);
    reader
        .into_dimensions()
        .map_err(|e| ProcessingError::DecodeFailed(format!("无法读取图片尺寸：{}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgba};

    fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 255])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    fn constraints() -> LoadConstraints {
        LoadConstraints {
            limits: PipelineLimits::background_removal(),
            max_source_pixels: 100_000_000,
            filter: ResizeFilter::CatmullRom,
        }
    }

    #[test]
    fn small_image_is_loaded_unchanged() {
        let png = create_png_bytes(320, 200);
        let loaded = load(&png, &constraints()).expect("load");
        assert_eq!(loaded.buffer.dimensions(), (320, 200));
        assert_eq!(loaded.format, ImageFormat::Png);
        assert_eq!(loaded.buffer.as_raw().len(), 320 * 200 * 4);
    }

    #[test]
    fn large_image_is_clamped_to_working_pixels() {
        let png = create_png_bytes(2400, 1600);
        let loaded = load(&png, &constraints()).expect("load");
        let (w, h) = loaded.buffer.dimensions();
        assert!(w as u64 * h as u64 <= 1_048_576);
        assert!((w as f64 / h as f64 - 1.5).abs() < 0.01);
        assert_eq!((loaded.source_width, loaded.source_height), (2400, 1600));
    }

    #[test]
    fn oversized_bytes_fail_before_decode() {
        let bytes = vec![0u8; 16 * 1024 * 1024];
        assert!(matches!(
            load(&bytes, &constraints()),
            Err(ProcessingError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(load(&[], &constraints()), Err(ProcessingError::InvalidInput(_))));
    }

    #[test]
    fn non_image_mime_is_invalid_input() {
        let pdf = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n".to_vec();
        assert!(matches!(load(&pdf, &constraints()), Err(ProcessingError::InvalidInput(_))));
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let noise = vec![0x13u8; 64];
        assert!(matches!(
            load(&noise, &constraints()),
            Err(ProcessingError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn truncated_png_fails_to_decode() {
        let mut png = create_png_bytes(64, 64);
        png.truncate(png.len() / 2);
        assert!(matches!(load(&png, &constraints()), Err(ProcessingError::DecodeFailed(_))));
    }

    #[test]
    fn header_pixel_ceiling_rejects_before_decode() {
        let png = create_png_bytes(200, 200);
        let mut tight = constraints();
        tight.max_source_pixels = 10_000;
        assert!(matches!(load(&png, &tight), Err(ProcessingError::InvalidInput(_))));
    }

    #[test]
    fn decode_memory_ceiling_rejects_before_decode() {
        let png = create_png_bytes(200, 200);
        let mut tight = constraints();
        tight.limits.max_decoded_bytes = 200 * 200 * 4 - 1;
        assert!(matches!(load(&png, &tight), Err(ProcessingError::InvalidInput(_))));

        tight.limits.max_decoded_bytes = 200 * 200 * 4 * 2;
        assert_eq!(load(&png, &tight).expect("load").buffer.dimensions(), (200, 200));
    }

    #[test]
    fn base64_data_url_is_decoded() {
        let png = create_png_bytes(8, 8);
        let data_url = format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(&png));
        let raw = read_source(ImageSource::Base64(data_url), 1024 * 1024).expect("read base64");
        assert_eq!(raw.bytes, png);
        assert_eq!(raw.source_hint, "base64");
    }

    #[test]
    fn base64_limit_rejects_before_decode() {
        let huge = "A".repeat(1024 * 1024);
        assert!(matches!(
            parse_base64_with_limit(&huge, 32),
            Err(ProcessingError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn missing_file_is_invalid_input() {
        let result = read_source(
            ImageSource::FilePath("/definitely/not/here.png".into()),
            1024,
        );
        assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
    }
}
