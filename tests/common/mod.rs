//! 集成测试共用的图片构造工具。

#![allow(dead_code)]

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};
use pixel_core::processing::{ImageProcessor, ProcessorConfig};

/// 用像素函数生成 PNG 字节。
pub fn png_bytes(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let image: RgbaImage = ImageBuffer::from_fn(width, height, |x, y| Rgba(pixel(x, y)));
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("encode png");
    cursor.into_inner()
}

pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    png_bytes(width, height, |_, _| rgba)
}

pub fn decode_rgba(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).expect("decode output").to_rgba8()
}

pub fn processor() -> ImageProcessor {
    ImageProcessor::with_own_governor(ProcessorConfig::default()).expect("processor")
}
