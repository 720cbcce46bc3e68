//! 进度回报：流水线在固定检查点调用回调，回调只做观察，不影响流程。

use std::fmt;
use std::sync::Arc;

/// 进度回调：`(完成百分比 0–100, 阶段标签)`。
pub type ProgressCallback = Arc<dyn Fn(u8, &'static str) + Send + Sync>;

/// 固定的流水线检查点。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Load,
    Analyze,
    Select,
    Process,
    Enhance,
    Finalize,
}

impl ProgressStage {
    pub fn percent(self) -> u8 {
        match self {
            Self::Load => 10,
            Self::Analyze => 25,
            Self::Select => 40,
            Self::Process => 60,
            Self::Enhance => 80,
            Self::Finalize => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Analyze => "analyze",
            Self::Select => "select",
            Self::Process => "process",
            Self::Enhance => "enhance",
            Self::Finalize => "finalize",
        }
    }
}

#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self { callback }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, stage: ProgressStage) {
        log::debug!("⏳ 进度 {}% - {}", stage.percent(), stage.label());
        if let Some(callback) = &self.callback {
            callback(stage.percent(), stage.label());
        }
    }
}
