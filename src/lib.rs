//! # pixel-core — 库入口
//!
//! 基于规则的本地图片处理引擎：背景移除与安全放大。所有计算都在内存中的 RGBA 缓冲上完成，
//! 不加载任何模型，也不访问网络。
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │          调用方（CLI / 宿主应用 / Web Worker 桥）          │
//! │     ImageSource + RemovalOptions / UpscaleOptions        │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<ProcessingResult, ProcessingError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            processing                            │
//! │                                                          │
//! │  ┌─ handler ──── ImageProcessor（配置快照 + 编排）         │
//! │  ├─ governor ─── ResourceGovernor / ResourceHandle (RAII)│
//! │  ├─ loader ───── 体积·签名·像素上限 + 两阶段降采样         │
//! │  ├─ analyzer ─── 肤色·纹理·边缘·伪影·内容类型             │
//! │  ├─ mask ─────── 四张掩码 → 加权融合 → 透明度 / 羽化      │
//! │  ├─ upscale ──── 安全倍数 · 策略选择 · 后处理              │
//! │  └─ finalize ─── PNG / JPEG / WebP 编码 + 释放表面         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `ProcessingError`，带错误码与所属阶段 |
//! | [`processing`] | 两条处理流水线及其全部基础设施 |

pub mod error;
pub mod processing;
