//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `ProcessingError` 枚举，覆盖抠图与放大两条流水线的全部失败场景，
//! 替代分散的字符串错误。每种错误都是终止性的：不自动重试，也不返回部分结果。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息，消息中携带“实际值 vs 限制值”。
//! - `code()` / `stage()` 提供稳定的机器可读分类，便于宿主层映射提示文案。
//! - 实现 `Serialize` 将错误序列化为字符串，便于跨进程/跨线程透传。

use serde::Serialize;

/// 像素处理统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// 输入不合法（空数据、非图片 MIME、参数越界）
    #[error("输入无效：{0}")]
    InvalidInput(String),

    /// 文件体积超过流水线上限
    #[error("文件过大：{:.2} MB（限制：{:.2} MB）", megabytes(.actual), megabytes(.limit))]
    FileTooLarge { actual: u64, limit: u64 },

    /// 无法识别的图片格式
    #[error("不支持的图片格式：{0}")]
    UnsupportedFormat(String),

    /// 解码失败
    #[error("图片解码失败：{0}")]
    DecodeFailed(String),

    /// 并发处理数已达上限
    #[error("处理任务过多：当前 {active} 个（限制：{limit} 个），请稍后重试")]
    ResourceExhausted { active: usize, limit: usize },

    /// 绘制表面无法创建
    #[error("绘制表面不可用：{0}")]
    RenderingUnavailable(String),

    /// 安全裁剪后的放大倍数过小
    #[error("放大倍数过小：有效倍数 {effective:.2}x（最低：{minimum:.2}x），原图尺寸已接近输出上限")]
    ScaleTooSmall { effective: f64, minimum: f64 },

    /// 编码输出失败
    #[error("图片编码失败：{0}")]
    EncodingFailed(String),
}

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / 1024.0 / 1024.0
}

impl ProcessingError {
    /// 稳定的错误码，供宿主层做分支处理。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::DecodeFailed(_) => "decode_failed",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::RenderingUnavailable(_) => "rendering_unavailable",
            Self::ScaleTooSmall { .. } => "scale_too_small",
            Self::EncodingFailed(_) => "encoding_failed",
        }
    }

    /// 错误所属的流水线阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "input",
            Self::FileTooLarge { .. } | Self::UnsupportedFormat(_) | Self::DecodeFailed(_) => "load",
            Self::ResourceExhausted { .. } => "governor",
            Self::RenderingUnavailable(_) => "render",
            Self::ScaleTooSmall { .. } => "scale",
            Self::EncodingFailed(_) => "encode",
        }
    }
}

/// 结构化错误负载，供需要区分错误码与阶段的调用方使用。
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingErrorPayload {
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
}

impl From<&ProcessingError> for ProcessingErrorPayload {
    fn from(error: &ProcessingError) -> Self {
        Self {
            code: error.code(),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for ProcessingError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
