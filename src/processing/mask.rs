//! # 掩码生成与融合（背景移除核心）
//!
//! ## 设计思路
//!
//! 四张互相独立的掩码分别从不同角度判断“哪里是背景”，最后加权平均：
//!
//! - **物体掩码**：结合内容分析结论（人像 / 动物 / 物体）逐像素打分
//! - **边缘掩码**：Sobel 梯度幅值超过 `sensitivity × 2.5` 视为前景
//! - **颜色掩码**：沿四条边采样得到主背景色，距离在 `sensitivity × 3.5` 以内视为背景
//! - **位置掩码**：纯几何，中心接近度 > 0.3 视为前景
//!
//! 掩码取值约定：`0` 前景，`255` 背景，`> 128` 即判定为背景。
//!
//! ## 实现思路
//!
//! 融合时按“实际参与的权重之和”归一化，因此缺省某张掩码或权重被重新分配后，
//! 结果仍落在 `[0, 255]`，四张相同掩码融合后保持原值。
//!
//! 羽化使用逐行距离 + 纵向窗口的精确欧氏距离，搜索半径 8 像素：
//! 背景像素按“到最近前景像素的距离”得到 `1 − d / 8` 的衰减透明度，
//! 超出半径即完全透明；前景像素不受羽化影响。

use serde::Serialize;

use super::analyzer::{ContentAnalysis, EDGE_ACTIVITY_THRESHOLD, edge_activity, is_skin_tone, is_texture_like};
use super::buffer::{MASK_BACKGROUND, MASK_FOREGROUND, Mask, PixelBuffer, luma_of};
use super::geometry::CenterWeight;
use super::options::RemovalAlgorithm;
use crate::error::ProcessingError;

/// 羽化搜索半径（像素）。
pub const FEATHER_RADIUS: u32 = 8;
/// 前景保留细节时的透明度增益。
pub const DETAIL_ALPHA_BOOST: f32 = 1.05;
/// 颜色掩码的 RGB 量化除数。
pub const COLOR_QUANTIZATION: u8 = 12;
/// 颜色掩码的边缘采样步长。
pub const BORDER_SAMPLE_STRIDE: u32 = 4;

const POSITION_CENTER_WEIGHT: f32 = 0.3;
const SALIENT_CENTER_WEIGHT: f32 = 0.4;
const SALIENT_SATURATION: f32 = 0.2;
const SALIENT_BRIGHTNESS: (f32, f32) = (20.0, 200.0);

/// 四张掩码的融合权重。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaskWeights {
    pub object: f32,
    pub edge: f32,
    pub color: f32,
    pub position: f32,
}

impl Default for MaskWeights {
    fn default() -> Self {
        Self {
            object: 0.4,
            edge: 0.25,
            color: 0.2,
            position: 0.15,
        }
    }
}

impl MaskWeights {
    /// 根据内容分析重新分配权重。
    ///
    /// 含人像或动物时提高物体、边缘掩码权重；主体居中时提高位置掩码权重。
    /// 不要求总和为 1，融合阶段会按实际总和归一化。
    pub fn for_analysis(analysis: &ContentAnalysis) -> Self {
        let mut weights = Self::default();
        if analysis.has_human || analysis.has_animal {
            weights.object = 0.5;
            weights.edge = 0.3;
        }
        if analysis.subject_in_center {
            weights.position = 0.25;
        }
        weights
    }
}

/// 一组待融合的掩码，缺省项不参与融合。
#[derive(Debug, Clone, Default)]
pub struct MaskSet {
    pub object: Option<Mask>,
    pub edge: Option<Mask>,
    pub color: Option<Mask>,
    pub position: Option<Mask>,
}

impl MaskSet {
    fn weighted<'a>(&'a self, weights: &MaskWeights) -> Vec<(&'a Mask, f32)> {
        [
            (self.object.as_ref(), weights.object),
            (self.edge.as_ref(), weights.edge),
            (self.color.as_ref(), weights.color),
            (self.position.as_ref(), weights.position),
        ]
        .into_iter()
        .filter_map(|(mask, weight)| mask.map(|mask| (mask, weight)))
        .filter(|(_, weight)| *weight > 0.0)
        .collect()
    }
}

/// 把用户选择的主体类型并入分析结论：显式选择视为对应检测已命中。
pub fn apply_algorithm_hint(analysis: &ContentAnalysis, algorithm: RemovalAlgorithm) -> ContentAnalysis {
    let mut hinted = analysis.clone();
    match algorithm {
        RemovalAlgorithm::Auto => {}
        RemovalAlgorithm::Portrait => hinted.has_human = true,
        RemovalAlgorithm::Animal => hinted.has_animal = true,
        RemovalAlgorithm::Object => hinted.has_object = true,
    }
    hinted
}

/// HSV 饱和度与明度（0–255）。
fn saturation_and_value(r: u8, g: u8, b: u8) -> (f32, f32) {
    let max = r.max(g).max(b) as f32;
    let min = r.min(g).min(b) as f32;
    let saturation = if max == 0.0 { 0.0 } else { (max - min) / max };
    (saturation, max)
}

/// 物体检测掩码。
pub fn object_mask(buffer: &PixelBuffer, analysis: &ContentAnalysis) -> Mask {
    let (width, height) = buffer.dimensions();
    let center = CenterWeight::new(width, height);
    let mut mask = Mask::new_filled(width, height, MASK_BACKGROUND);

    for y in 0..height {
        for x in 0..width {
            let [r, g, b, _] = buffer.pixel(x, y);
            let weight = center.at(x, y);

            let mut foreground = analysis.has_human && is_skin_tone(r, g, b);
            if !foreground && analysis.has_animal {
                foreground = is_texture_like(buffer, x, y);
            }
            if !foreground && analysis.has_object && weight > POSITION_CENTER_WEIGHT {
                foreground = edge_activity(buffer, x, y) > EDGE_ACTIVITY_THRESHOLD;
            }
            if !foreground && weight > SALIENT_CENTER_WEIGHT {
                let (saturation, value) = saturation_and_value(r, g, b);
                foreground = saturation > SALIENT_SATURATION
                    && (SALIENT_BRIGHTNESS.0..=SALIENT_BRIGHTNESS.1).contains(&value);
            }

            if foreground {
                mask.set(x, y, MASK_FOREGROUND);
            }
        }
    }
    mask
}

/// Sobel 边缘掩码，梯度幅值超过 `sensitivity × 2.5` 的像素为前景。
pub fn edge_mask(buffer: &PixelBuffer, sensitivity: u32) -> Mask {
    let (width, height) = buffer.dimensions();
    let threshold = sensitivity as f32 * 2.5;
    let mut mask = Mask::new_filled(width, height, MASK_BACKGROUND);

    let luma_at = |x: i64, y: i64| {
        let [r, g, b, _] = buffer.pixel_clamped(x, y);
        luma_of(r, g, b)
    };

    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (x as i64, y as i64);
            let tl = luma_at(xi - 1, yi - 1);
            let tc = luma_at(xi, yi - 1);
            let tr = luma_at(xi + 1, yi - 1);
            let ml = luma_at(xi - 1, yi);
            let mr = luma_at(xi + 1, yi);
            let bl = luma_at(xi - 1, yi + 1);
            let bc = luma_at(xi, yi + 1);
            let br = luma_at(xi + 1, yi + 1);

            let gx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
            let gy = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);

            if (gx * gx + gy * gy).sqrt() > threshold {
                mask.set(x, y, MASK_FOREGROUND);
            }
        }
    }
    mask
}

/// 沿四条边采样，返回出现次数最多的量化桶内的平均颜色。
pub fn dominant_border_color(buffer: &PixelBuffer) -> [u8; 3] {
    let (width, height) = buffer.dimensions();
    let mut buckets: std::collections::HashMap<[u8; 3], (usize, [u64; 3])> = std::collections::HashMap::new();

    let mut record = |x: u32, y: u32| {
        let [r, g, b, _] = buffer.pixel(x, y);
        let key = [r / COLOR_QUANTIZATION, g / COLOR_QUANTIZATION, b / COLOR_QUANTIZATION];
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += r as u64;
        entry.1[1] += g as u64;
        entry.1[2] += b as u64;
    };

    for x in (0..width).step_by(BORDER_SAMPLE_STRIDE as usize) {
        record(x, 0);
        record(x, height - 1);
    }
    for y in (0..height).step_by(BORDER_SAMPLE_STRIDE as usize) {
        record(0, y);
        record(width - 1, y);
    }

    // 计数相同时按桶键排序，保证结果确定
    buckets
        .into_iter()
        .max_by(|(key_a, (count_a, _)), (key_b, (count_b, _))| count_a.cmp(count_b).then(key_b.cmp(key_a)))
        .map(|(_, (count, sum))| {
            let n = count.max(1) as u64;
            [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8]
        })
        .unwrap_or([0, 0, 0])
}

/// 颜色聚类掩码：与主背景色的欧氏距离不超过 `sensitivity × 3.5` 的像素为背景。
pub fn color_mask(buffer: &PixelBuffer, sensitivity: u32) -> Mask {
    let (width, height) = buffer.dimensions();
    let background = dominant_border_color(buffer);
    let threshold = sensitivity as f32 * 3.5;
    let mut mask = Mask::new_filled(width, height, MASK_FOREGROUND);

    for y in 0..height {
        for x in 0..width {
            let [r, g, b, _] = buffer.pixel(x, y);
            let dr = r as f32 - background[0] as f32;
            let dg = g as f32 - background[1] as f32;
            let db = b as f32 - background[2] as f32;
            if (dr * dr + dg * dg + db * db).sqrt() <= threshold {
                mask.set(x, y, MASK_BACKGROUND);
            }
        }
    }
    mask
}

/// 位置掩码：中心接近度 > 0.3 为前景。
pub fn position_mask(width: u32, height: u32) -> Mask {
    let center = CenterWeight::new(width, height);
    let mut mask = Mask::new_filled(width, height, MASK_BACKGROUND);
    for y in 0..height {
        for x in 0..width {
            if center.at(x, y) > POSITION_CENTER_WEIGHT {
                mask.set(x, y, MASK_FOREGROUND);
            }
        }
    }
    mask
}

/// 生成全部四张掩码。
pub fn generate_masks(buffer: &PixelBuffer, analysis: &ContentAnalysis, sensitivity: u32) -> MaskSet {
    let (width, height) = buffer.dimensions();
    MaskSet {
        object: Some(object_mask(buffer, analysis)),
        edge: Some(edge_mask(buffer, sensitivity)),
        color: Some(color_mask(buffer, sensitivity)),
        position: Some(position_mask(width, height)),
    }
}

/// 按实际参与的权重之和归一化的逐像素加权平均。
pub fn fuse_masks(masks: &MaskSet, weights: &MaskWeights) -> Result<Mask, ProcessingError> {
    let weighted = masks.weighted(weights);
    let Some((first, _)) = weighted.first() else {
        return Err(ProcessingError::InvalidInput("没有可融合的掩码".to_string()));
    };

    let dimensions = first.dimensions();
    if let Some((mismatch, _)) = weighted.iter().find(|(mask, _)| mask.dimensions() != dimensions) {
        return Err(ProcessingError::InvalidInput(format!(
            "掩码尺寸不一致：{:?} 与 {:?}",
            dimensions,
            mismatch.dimensions()
        )));
    }

    let total: f32 = weighted.iter().map(|(_, weight)| weight).sum();
    let len = dimensions.0 as usize * dimensions.1 as usize;
    let mut fused = Vec::with_capacity(len);
    for i in 0..len {
        let sum: f32 = weighted
            .iter()
            .map(|(mask, weight)| mask.as_raw()[i] as f32 * weight)
            .sum();
        fused.push((sum / total).round().clamp(0.0, 255.0) as u8);
    }

    Mask::from_raw(dimensions.0, dimensions.1, fused)
}

/// 每个像素到最近背景像素的欧氏距离，上限为 `radius`；背景像素自身为 0。
pub fn background_distances(mask: &Mask, radius: u32) -> Vec<f32> {
    nearest_distances(mask, radius, true)
}

/// 每个像素到最近前景像素的欧氏距离，上限为 `radius`；前景像素自身为 0。
pub fn foreground_distances(mask: &Mask, radius: u32) -> Vec<f32> {
    nearest_distances(mask, radius, false)
}

fn nearest_distances(mask: &Mask, radius: u32, to_background: bool) -> Vec<f32> {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let cap = radius + 1;
    let is_target = |x: u32, y: u32| mask.is_background(x, y) == to_background;

    // 同一行内到最近目标像素的水平距离
    let mut horizontal = vec![cap; w * h];
    for y in 0..height {
        let row = y as usize * w;
        let mut last: Option<u32> = None;
        for x in 0..width {
            if is_target(x, y) {
                last = Some(x);
            }
            if let Some(last) = last {
                horizontal[row + x as usize] = (x - last).min(cap);
            }
        }
        let mut next: Option<u32> = None;
        for x in (0..width).rev() {
            if is_target(x, y) {
                next = Some(x);
            }
            if let Some(next) = next {
                let i = row + x as usize;
                horizontal[i] = horizontal[i].min((next - x).min(cap));
            }
        }
    }

    let r = radius as i64;
    let mut distances = vec![radius as f32; w * h];
    for y in 0..height as i64 {
        for x in 0..w {
            let mut best = u64::MAX;
            for dy in -r..=r {
                let ny = y + dy;
                if ny < 0 || ny >= height as i64 {
                    continue;
                }
                let dx = horizontal[ny as usize * w + x] as u64;
                if dx >= cap as u64 {
                    continue;
                }
                best = best.min(dx * dx + (dy * dy) as u64);
            }
            if best != u64::MAX {
                distances[y as usize * w + x] = (best as f32).sqrt().min(radius as f32);
            }
        }
    }
    distances
}

/// 把融合掩码写入透明通道。
///
/// - 背景（> 128）：关闭羽化时透明度置 0；开启羽化时按到最近前景的距离 `d`
///   取 `1 − d / 8` 的衰减透明度，`d ≥ 8` 时为 0
/// - 前景：保持原透明度；开启细节保留时乘以 1.05（上限 255）
pub fn apply_alpha(
    buffer: &mut PixelBuffer,
    mask: &Mask,
    feather_edges: bool,
    preserve_details: bool,
) -> Result<(), ProcessingError> {
    if buffer.dimensions() != mask.dimensions() {
        return Err(ProcessingError::InvalidInput(format!(
            "掩码尺寸 {:?} 与图像尺寸 {:?} 不一致",
            mask.dimensions(),
            buffer.dimensions()
        )));
    }

    let (width, height) = buffer.dimensions();
    let distances = feather_edges.then(|| foreground_distances(mask, FEATHER_RADIUS));
    let radius = FEATHER_RADIUS as f32;

    for y in 0..height {
        for x in 0..width {
            let mut alpha = buffer.pixel(x, y)[3] as f32;
            if mask.is_background(x, y) {
                alpha = match &distances {
                    Some(distances) => {
                        let distance = distances[y as usize * width as usize + x as usize];
                        alpha * (1.0 - distance / radius).max(0.0)
                    }
                    None => 0.0,
                };
            } else if preserve_details {
                alpha *= DETAIL_ALPHA_BOOST;
            }
            buffer.set_alpha(x, y, alpha.round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::analyzer::analyze;

    fn checkerboard(size: u32, cell: u32) -> PixelBuffer {
        let mut buffer = PixelBuffer::filled(size, size, [0, 0, 0, 255]).expect("buffer");
        for y in 0..size {
            for x in 0..size {
                if ((x / cell) + (y / cell)) % 2 == 0 {
                    buffer.set_pixel(x, y, [255, 255, 255, 255]);
                }
            }
        }
        buffer
    }

    #[test]
    fn default_weights_match_base_table() {
        let weights = MaskWeights::default();
        assert_eq!((weights.object, weights.edge, weights.color, weights.position), (0.4, 0.25, 0.2, 0.15));
    }

    #[test]
    fn weights_are_reassigned_for_subjects() {
        let buffer = PixelBuffer::filled(8, 8, [0, 0, 0, 255]).expect("buffer");
        let mut analysis = analyze(&buffer, 1);
        analysis.has_human = true;
        analysis.subject_in_center = true;
        let weights = MaskWeights::for_analysis(&analysis);
        assert_eq!((weights.object, weights.edge, weights.color, weights.position), (0.5, 0.3, 0.2, 0.25));
    }

    #[test]
    fn fusing_identical_masks_keeps_value() {
        let mask = Mask::new_filled(4, 4, 77);
        let set = MaskSet {
            object: Some(mask.clone()),
            edge: Some(mask.clone()),
            color: Some(mask.clone()),
            position: Some(mask.clone()),
        };
        let weights = MaskWeights {
            object: 0.5,
            edge: 0.3,
            color: 0.2,
            position: 0.25,
        };
        assert_eq!(fuse_masks(&set, &weights).expect("fuse"), mask);
    }

    #[test]
    fn fusion_normalizes_by_applied_weights() {
        let set = MaskSet {
            object: Some(Mask::new_filled(2, 2, 255)),
            edge: None,
            color: Some(Mask::new_filled(2, 2, 0)),
            position: None,
        };
        let fused = fuse_masks(&set, &MaskWeights::default()).expect("fuse");
        // 255 * 0.4 / 0.6
        assert_eq!(fused.get(0, 0), 170);
    }

    #[test]
    fn fusion_without_masks_fails() {
        let result = fuse_masks(&MaskSet::default(), &MaskWeights::default());
        assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
    }

    #[test]
    fn fusion_rejects_mismatched_sizes() {
        let set = MaskSet {
            object: Some(Mask::new_filled(2, 2, 0)),
            edge: Some(Mask::new_filled(3, 2, 0)),
            ..MaskSet::default()
        };
        assert!(fuse_masks(&set, &MaskWeights::default()).is_err());
    }

    #[test]
    fn solid_color_is_background_in_color_mask() {
        let buffer = PixelBuffer::filled(50, 50, [255, 0, 0, 255]).expect("buffer");
        assert_eq!(dominant_border_color(&buffer), [255, 0, 0]);
        let mask = color_mask(&buffer, 25);
        assert_eq!(mask.foreground_ratio(), 0.0);
    }

    #[test]
    fn color_mask_keeps_distinct_subject() {
        let mut buffer = PixelBuffer::filled(40, 40, [250, 250, 250, 255]).expect("buffer");
        for y in 15..25 {
            for x in 15..25 {
                buffer.set_pixel(x, y, [20, 40, 160, 255]);
            }
        }
        let mask = color_mask(&buffer, 25);
        assert!(!mask.is_background(20, 20));
        assert!(mask.is_background(2, 2));
    }

    #[test]
    fn flat_image_has_no_sobel_edges() {
        let buffer = PixelBuffer::filled(20, 20, [90, 90, 90, 255]).expect("buffer");
        assert_eq!(edge_mask(&buffer, 25).foreground_ratio(), 0.0);
    }

    #[test]
    fn checkerboard_boundaries_are_foreground_in_edge_mask() {
        let buffer = checkerboard(64, 8);
        let mask = edge_mask(&buffer, 25);
        let mut boundary = 0;
        let mut marked = 0;
        for y in 0..64 {
            for x in 0..64 {
                let near_vertical = x % 8 == 7 || (x % 8 == 0 && x > 0);
                let near_horizontal = y % 8 == 7 || (y % 8 == 0 && y > 0);
                if near_vertical || near_horizontal {
                    boundary += 1;
                    if mask.get(x, y) == MASK_FOREGROUND {
                        marked += 1;
                    }
                }
            }
        }
        assert!(marked * 2 > boundary, "{marked}/{boundary}");
    }

    #[test]
    fn position_mask_marks_center_only() {
        let mask = position_mask(100, 100);
        assert_eq!(mask.get(50, 50), MASK_FOREGROUND);
        assert_eq!(mask.get(0, 0), MASK_BACKGROUND);
    }

    #[test]
    fn object_mask_flags_saturated_center() {
        let mut buffer = PixelBuffer::filled(60, 60, [128, 128, 128, 255]).expect("buffer");
        for y in 25..35 {
            for x in 25..35 {
                buffer.set_pixel(x, y, [30, 150, 60, 255]);
            }
        }
        let analysis = analyze(&buffer, 3);
        let mask = object_mask(&buffer, &analysis);
        assert_eq!(mask.get(30, 30), MASK_FOREGROUND);
        assert_eq!(mask.get(0, 0), MASK_BACKGROUND);
    }

    #[test]
    fn portrait_hint_forces_human_detection() {
        let buffer = PixelBuffer::filled(8, 8, [0, 0, 255, 255]).expect("buffer");
        let analysis = analyze(&buffer, 1);
        assert!(!analysis.has_human);
        assert!(apply_algorithm_hint(&analysis, RemovalAlgorithm::Portrait).has_human);
        assert!(apply_algorithm_hint(&analysis, RemovalAlgorithm::Animal).has_animal);
    }

    #[test]
    fn hard_alpha_without_feathering() {
        let mut buffer = PixelBuffer::filled(4, 1, [10, 10, 10, 200]).expect("buffer");
        let mask = Mask::from_raw(4, 1, vec![255, 255, 0, 0]).expect("mask");
        apply_alpha(&mut buffer, &mask, false, true).expect("apply");
        assert_eq!(buffer.pixel(0, 0)[3], 0);
        assert_eq!(buffer.pixel(2, 0)[3], 210);
    }

    #[test]
    fn feathered_background_fades_away_from_subject() {
        let width = 20;
        let mut buffer = PixelBuffer::filled(width, 3, [10, 10, 10, 255]).expect("buffer");
        let mut data = Vec::new();
        for _ in 0..3 {
            for x in 0..width {
                data.push(if x < 10 { MASK_BACKGROUND } else { MASK_FOREGROUND });
            }
        }
        let mask = Mask::from_raw(width, 3, data).expect("mask");
        apply_alpha(&mut buffer, &mask, true, true).expect("apply");

        let alphas: Vec<u8> = (0..width).map(|x| buffer.pixel(x, 1)[3]).collect();
        assert!(alphas.windows(2).all(|pair| pair[0] <= pair[1]), "{alphas:?}");
        // 距主体 1 像素：255 × (1 − 1/8)
        assert_eq!(alphas[9], 223);
        assert_eq!(alphas[2], 0);
        assert!(alphas[10..].iter().all(|a| *a == 255));
    }

    #[test]
    fn thin_subject_stays_opaque_when_feathered() {
        let mut buffer = PixelBuffer::filled(5, 1, [10, 10, 10, 255]).expect("buffer");
        let mask = Mask::from_raw(5, 1, vec![255, 0, 0, 0, 255]).expect("mask");
        apply_alpha(&mut buffer, &mask, true, false).expect("apply");

        let alphas: Vec<u8> = (0..5).map(|x| buffer.pixel(x, 0)[3]).collect();
        assert_eq!(alphas, vec![223, 255, 255, 255, 223]);
    }

    #[test]
    fn foreground_distances_measure_to_subject() {
        let mask = Mask::from_raw(6, 1, vec![255, 255, 255, 0, 255, 255]).expect("mask");
        let distances = foreground_distances(&mask, FEATHER_RADIUS);
        assert_eq!(distances, vec![3.0, 2.0, 1.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn distances_are_capped_at_radius() {
        let mask = Mask::new_filled(20, 20, MASK_FOREGROUND);
        let distances = background_distances(&mask, FEATHER_RADIUS);
        assert!(distances.iter().all(|d| *d == FEATHER_RADIUS as f32));
    }

    #[test]
    fn alpha_rejects_mismatched_mask() {
        let mut buffer = PixelBuffer::filled(4, 4, [0, 0, 0, 255]).expect("buffer");
        let mask = Mask::new_filled(2, 2, 0);
        assert!(apply_alpha(&mut buffer, &mask, false, false).is_err());
    }
}
