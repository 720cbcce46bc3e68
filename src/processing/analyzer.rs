//! # 内容分析模块（Content Analyzer）
//!
//! ## 设计思路
//!
//! 对工作缓冲做一次只读扫描，得到下游挑选算法所需的摘要 `ContentAnalysis`。
//! 这里没有任何模型推理：肤色、毛发纹理、边缘活跃度都是基于像素邻域的规则判断。
//!
//! ## 实现思路
//!
//! - 按步长（默认每 3 个像素）采样，用精度换速度，小主体漏检可以接受。
//! - 肤色：浅 / 中 / 深三组互斥的 RGB 规则，满足任一组即判定为肤色。
//! - 纹理：5×5 邻域亮度绝对差之和落在 `(150, 800)` 之间（既不平坦也不杂乱）。
//! - 边缘活跃度：3×3 邻域内逐邻居通道差的**最大值**（不是求和）。
//! - 压缩伪影：8×8 块方差采样，检测“块内平坦、块间台阶集中在边界”的特征。
//!
//! 阈值都是经验值，见下方常量。

use std::collections::HashMap;

use serde::Serialize;

use super::buffer::{PixelBuffer, luma_of};

/// 肤色像素占比超过该值时判定含人像。
pub const HUMAN_SKIN_RATIO: f64 = 0.015;
/// 纹理像素占比超过该值时判定含动物（毛发）。
pub const ANIMAL_TEXTURE_RATIO: f64 = 0.25;
/// 边缘像素占比超过该值时判定含物体。
pub const OBJECT_EDGE_RATIO: f64 = 0.1;
/// 边缘活跃度超过该值的像素计为边缘像素。
pub const EDGE_ACTIVITY_THRESHOLD: f32 = 30.0;
/// 纹理变化量的下限与上限（开区间）。
pub const TEXTURE_VARIATION_RANGE: (f32, f32) = (150.0, 800.0);
/// 块伪影得分超过该值时判定存在压缩伪影。
pub const ARTIFACT_SCORE_THRESHOLD: f64 = 0.08;
/// 边缘占比超过该值视为“锐利边缘主导”。
pub const SHARP_EDGE_RATIO: f64 = 0.25;
/// 孤立噪点：与邻域均值相差超过该值。
pub const NOISE_DEVIATION: f32 = 30.0;

/// 内容类型分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Photo,
    Art,
    Text,
    Mixed,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Art => "art",
            Self::Text => "text",
            Self::Mixed => "mixed",
        }
    }
}

/// 单次操作的内容摘要，计算后只读。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentAnalysis {
    pub has_human: bool,
    pub has_animal: bool,
    pub has_object: bool,
    pub subject_in_center: bool,
    /// 背景复杂度，等于边缘像素占比。
    pub background_complexity: f64,
    pub dominant_colors: Vec<[u8; 3]>,
    pub content_type: ContentType,
    pub is_pixel_art: bool,
    pub has_compression_artifacts: bool,
    pub artifact_score: f64,
    pub skin_ratio: f64,
    pub texture_ratio: f64,
    pub edge_ratio: f64,
    /// 量化后不同颜色数 / 采样数。
    pub color_complexity: f64,
    pub distinct_colors: usize,
    pub sampled_pixels: usize,
}

/// 三组肤色规则，满足任一组即为肤色。
pub fn is_skin_tone(r: u8, g: u8, b: u8) -> bool {
    let (ri, gi, bi) = (r as i32, g as i32, b as i32);
    let max = ri.max(gi).max(bi);
    let min = ri.min(gi).min(bi);

    let light = ri > 95
        && gi > 40
        && bi > 20
        && max - min > 15
        && (ri - gi).abs() > 15
        && ri > gi
        && ri > bi;

    let medium = ri > 80
        && gi > 50
        && bi > 30
        && ri > gi
        && gi > bi
        && ri - bi > 20
        && ri - gi < 60;

    let dark = ri > 45
        && gi > 30
        && bi > 15
        && ri > gi
        && gi >= bi
        && ri - bi > 10
        && max < 160;

    light || medium || dark
}

/// 5×5 邻域亮度绝对差之和。
pub fn texture_variation(buffer: &PixelBuffer, x: u32, y: u32) -> f32 {
    let center = buffer.brightness(x, y);
    let mut sum = 0.0;
    for dy in -2i64..=2 {
        for dx in -2i64..=2 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let [r, g, b, _] = buffer.pixel_clamped(x as i64 + dx, y as i64 + dy);
            let brightness = (r as f32 + g as f32 + b as f32) / 3.0;
            sum += (center - brightness).abs();
        }
    }
    sum
}

pub fn is_texture_like(buffer: &PixelBuffer, x: u32, y: u32) -> bool {
    let variation = texture_variation(buffer, x, y);
    variation > TEXTURE_VARIATION_RANGE.0 && variation < TEXTURE_VARIATION_RANGE.1
}

/// 3×3 邻域内逐邻居通道差梯度的最大值。
pub fn edge_activity(buffer: &PixelBuffer, x: u32, y: u32) -> f32 {
    let [r, g, b, _] = buffer.pixel(x, y);
    let mut max_gradient = 0.0f32;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let [nr, ng, nb, _] = buffer.pixel_clamped(x as i64 + dx, y as i64 + dy);
            let gradient = (r.abs_diff(nr) as f32 + g.abs_diff(ng) as f32 + b.abs_diff(nb) as f32) / 3.0;
            max_gradient = max_gradient.max(gradient);
        }
    }
    max_gradient
}

/// 孤立噪点：自身与 8 邻域均值偏差大，而邻域彼此接近。
pub fn is_noise_pixel(buffer: &PixelBuffer, x: u32, y: u32) -> bool {
    let center = buffer.luma(x, y);
    let mut values = [0.0f32; 8];
    let mut i = 0;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let [r, g, b, _] = buffer.pixel_clamped(x as i64 + dx, y as i64 + dy);
            values[i] = luma_of(r, g, b);
            i += 1;
        }
    }
    let mean = values.iter().sum::<f32>() / 8.0;
    let spread = values.iter().map(|v| (v - mean).abs()).sum::<f32>() / 8.0;
    (center - mean).abs() > NOISE_DEVIATION && spread < NOISE_DEVIATION / 2.0
}

/// 8×8 块伪影得分：相邻两个平坦块之间的亮度台阶集中在块边界上的比例。
pub fn block_artifact_score(buffer: &PixelBuffer) -> f64 {
    const BLOCK: u32 = 8;
    const FLAT_VARIANCE: f32 = 20.0;
    const MIN_STEP: f32 = 3.0;

    let (width, height) = buffer.dimensions();
    if width < BLOCK * 2 || height < BLOCK {
        return 0.0;
    }

    let blocks_x = width / BLOCK;
    let blocks_y = height / BLOCK;
    // 大图时跳块采样，控制在约 4096 个块以内
    let block_step = ((blocks_x as u64 * blocks_y as u64) as f64 / 4096.0).sqrt().ceil().max(1.0) as u32;

    let mut considered = 0usize;
    let mut blocky = 0usize;

    let mut by = 0;
    while by < blocks_y {
        let mut bx = 0;
        while bx + 1 < blocks_x {
            let (mean_a, var_a) = block_stats(buffer, bx * BLOCK, by * BLOCK);
            let (mean_b, var_b) = block_stats(buffer, (bx + 1) * BLOCK, by * BLOCK);
            considered += 1;

            if var_a < FLAT_VARIANCE && var_b < FLAT_VARIANCE {
                let step = (mean_a - mean_b).abs();
                if step > MIN_STEP {
                    let boundary_x = (bx + 1) * BLOCK;
                    let mut jump = 0.0;
                    for row in 0..BLOCK {
                        let y = by * BLOCK + row;
                        jump += (buffer.luma(boundary_x - 1, y) - buffer.luma(boundary_x, y)).abs();
                    }
                    jump /= BLOCK as f32;
                    if jump > step * 0.6 {
                        blocky += 1;
                    }
                }
            }
            bx += block_step;
        }
        by += block_step;
    }

    if considered == 0 {
        0.0
    } else {
        blocky as f64 / considered as f64
    }
}

fn block_stats(buffer: &PixelBuffer, x0: u32, y0: u32) -> (f32, f32) {
    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    for y in y0..y0 + 8 {
        for x in x0..x0 + 8 {
            let l = buffer.luma(x, y);
            sum += l;
            sum_sq += l * l;
        }
    }
    let mean = sum / 64.0;
    (mean, (sum_sq / 64.0 - mean * mean).max(0.0))
}

#[derive(Default)]
struct Bucket {
    count: usize,
    sum: [u64; 3],
}

/// 扫描缓冲生成内容摘要，不修改缓冲。
pub fn analyze(buffer: &PixelBuffer, stride: u32) -> ContentAnalysis {
    let stride = stride.max(1);
    let (width, height) = buffer.dimensions();

    let center_x = (width / 4, width - width / 4);
    let center_y = (height / 4, height - height / 4);

    let mut samples = 0usize;
    let mut skin = 0usize;
    let mut texture = 0usize;
    let mut edges = 0usize;
    let mut center_samples = 0usize;
    let mut center_edges = 0usize;
    let mut same_as_right = 0usize;

    let mut coarse: HashMap<u16, Bucket> = HashMap::new();
    let mut fine: HashMap<u16, usize> = HashMap::new();

    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            let [r, g, b, _] = buffer.pixel(x, y);
            samples += 1;

            if is_skin_tone(r, g, b) {
                skin += 1;
            }
            if is_texture_like(buffer, x, y) {
                texture += 1;
            }

            let is_edge = edge_activity(buffer, x, y) > EDGE_ACTIVITY_THRESHOLD;
            if is_edge {
                edges += 1;
            }

            let in_center = (center_x.0..center_x.1).contains(&x) && (center_y.0..center_y.1).contains(&y);
            if in_center {
                center_samples += 1;
                if is_edge {
                    center_edges += 1;
                }
            }

            if x + 1 < width && buffer.pixel(x + 1, y)[..3] == [r, g, b] {
                same_as_right += 1;
            }

            let coarse_key = ((r as u16 >> 5) << 6) | ((g as u16 >> 5) << 3) | (b as u16 >> 5);
            let bucket = coarse.entry(coarse_key).or_default();
            bucket.count += 1;
            bucket.sum[0] += r as u64;
            bucket.sum[1] += g as u64;
            bucket.sum[2] += b as u64;

            let fine_key = ((r as u16 >> 4) << 8) | ((g as u16 >> 4) << 4) | (b as u16 >> 4);
            *fine.entry(fine_key).or_default() += 1;
        }
    }

    let samples_f = samples.max(1) as f64;
    let skin_ratio = skin as f64 / samples_f;
    let texture_ratio = texture as f64 / samples_f;
    let edge_ratio = edges as f64 / samples_f;

    let outer_samples = samples.saturating_sub(center_samples);
    let outer_edges = edges.saturating_sub(center_edges);
    let center_edge_ratio = center_edges as f64 / center_samples.max(1) as f64;
    let outer_edge_ratio = outer_edges as f64 / outer_samples.max(1) as f64;
    let subject_in_center = center_edge_ratio > 0.05 && center_edge_ratio > outer_edge_ratio * 1.5;

    let mut ranked: Vec<&Bucket> = coarse.values().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    let dominant_colors: Vec<[u8; 3]> = ranked
        .iter()
        .take(5)
        .map(|bucket| {
            let n = bucket.count.max(1) as u64;
            [
                (bucket.sum[0] / n) as u8,
                (bucket.sum[1] / n) as u8,
                (bucket.sum[2] / n) as u8,
            ]
        })
        .collect();
    let top_two_coverage = ranked.iter().take(2).map(|bucket| bucket.count).sum::<usize>() as f64 / samples_f;

    let distinct_colors = fine.len();
    let color_complexity = distinct_colors as f64 / samples_f;

    let content_type = if top_two_coverage > 0.85 && edge_ratio > 0.05 {
        ContentType::Text
    } else if distinct_colors < 96 {
        ContentType::Art
    } else if distinct_colors >= 256 {
        ContentType::Photo
    } else {
        ContentType::Mixed
    };

    let same_ratio = same_as_right as f64 / samples_f;
    let is_pixel_art = distinct_colors < 64 && same_ratio > 0.5 && edge_ratio > 0.01;

    let artifact_score = block_artifact_score(buffer);

    let analysis = ContentAnalysis {
        has_human: skin_ratio > HUMAN_SKIN_RATIO,
        has_animal: texture_ratio > ANIMAL_TEXTURE_RATIO,
        has_object: edge_ratio > OBJECT_EDGE_RATIO,
        subject_in_center,
        background_complexity: edge_ratio,
        dominant_colors,
        content_type,
        is_pixel_art,
        has_compression_artifacts: artifact_score > ARTIFACT_SCORE_THRESHOLD,
        artifact_score,
        skin_ratio,
        texture_ratio,
        edge_ratio,
        color_complexity,
        distinct_colors,
        sampled_pixels: samples,
    };

    log::debug!(
        "🔍 内容分析 - 类型: {} 人像: {} 动物: {} 物体: {} 居中: {} 边缘占比: {:.3} 伪影: {:.3}",
        analysis.content_type.as_str(),
        analysis.has_human,
        analysis.has_animal,
        analysis.has_object,
        analysis.subject_in_center,
        analysis.edge_ratio,
        analysis.artifact_score
    );

    analysis
}
