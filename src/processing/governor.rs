//! # 资源管理模块（Resource Governor）
//!
//! ## 设计思路
//!
//! 浏览器端依赖“全局 Set + setInterval + beforeunload”管理画布生命周期，
//! 这里改为显式的 `ResourceGovernor` 对象，由调用方注入到每个流水线入口：
//!
//! 1. **准入控制**：在途表面数达到上限（默认 2）时立即返回 `ResourceExhausted`，不排队
//! 2. **RAII 释放**：`ResourceHandle` 在 `Drop` 中释放，成功、出错、提前返回、
//!    调用方放弃等待都只会释放一次
//! 3. **周期清扫**：定时强制注销超龄句柄；若平台提供堆内存遥测，超过阈值时提前清理
//!
//! ## 实现思路
//!
//! - 状态放在 `Arc<Mutex<GovernorState>>`，`ResourceGovernor` 可廉价克隆。
//! - 时钟与内存探针通过 trait 注入，测试中使用 `ManualClock` 控制时间。
//! - 释放路径遇到锁中毒时仍恢复内部状态完成注销，保证计数最终归零。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::buffer::PixelBuffer;
use super::config::GovernorConfig;
use crate::error::ProcessingError;

/// 可注入时钟。
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的时钟，主要用于测试。
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.origin + *offset
    }
}

/// 平台上报的堆内存使用情况。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

/// 可注入的内存遥测来源。
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    /// 无遥测能力时返回 `None`，压力检查随之成为空操作。
    fn heap_usage(&self) -> Option<HeapUsage>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemoryTelemetry;

impl MemoryProbe for NoMemoryTelemetry {
    fn heap_usage(&self) -> Option<HeapUsage> {
        None
    }
}

#[derive(Debug)]
struct HandleRecord {
    label: String,
    width: u32,
    height: u32,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct GovernorState {
    next_id: u64,
    active: HashMap<u64, HandleRecord>,
    peak: usize,
    total_acquired: u64,
    total_released: u64,
    force_released: u64,
    rejected: u64,
}

/// 资源管理器统计快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GovernorStats {
    pub active: usize,
    pub peak: usize,
    pub total_acquired: u64,
    pub total_released: u64,
    pub force_released: u64,
    pub rejected: u64,
}

/// 进程内共享的资源管理器。
#[derive(Clone)]
pub struct ResourceGovernor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn MemoryProbe>,
    state: Arc<Mutex<GovernorState>>,
}

impl fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGovernor")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResourceGovernor {
    /// 使用系统时钟、无内存遥测创建管理器。
    ///
    /// # 示例
    /// ```rust
    /// use pixel_core::processing::{GovernorConfig, ResourceGovernor};
    ///
    /// let governor = ResourceGovernor::new(GovernorConfig::default());
    /// let handle = governor.acquire("demo", 16, 16)?;
    /// assert_eq!(governor.active_count(), 1);
    /// handle.release();
    /// assert_eq!(governor.active_count(), 0);
    /// # Ok::<(), pixel_core::error::ProcessingError>(())
    /// ```
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            probe: Arc::new(NoMemoryTelemetry),
            state: Arc::new(Mutex::new(GovernorState::default())),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GovernorState>, ProcessingError> {
        self.state
            .lock()
            .map_err(|_| ProcessingError::RenderingUnavailable("资源管理器状态锁已中毒".to_string()))
    }

    /// 释放/清扫路径：锁中毒时依旧恢复状态继续执行。
    fn lock_state_recovering(&self) -> MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 准入检查：在途数量已达上限时返回 `ResourceExhausted`。
    pub fn admit(&self, label: &str) -> Result<(), ProcessingError> {
        let mut state = self.lock_state()?;
        self.check_admission(&mut state, label)
    }

    fn check_admission(&self, state: &mut GovernorState, label: &str) -> Result<(), ProcessingError> {
        let active = state.active.len();
        if active >= self.config.max_concurrent {
            state.rejected += 1;
            log::warn!(
                "⛔ 拒绝新的处理任务 - 任务: {} 在途: {} 上限: {}",
                label,
                active,
                self.config.max_concurrent
            );
            return Err(ProcessingError::ResourceExhausted {
                active,
                limit: self.config.max_concurrent,
            });
        }
        Ok(())
    }

    /// 准入并分配一块 `width × height` 的透明表面。
    pub fn acquire(&self, label: &str, width: u32, height: u32) -> Result<ResourceHandle, ProcessingError> {
        let id = {
            let mut state = self.lock_state()?;
            self.check_admission(&mut state, label)?;
            self.register(&mut state, label, width, height)
        };

        match allocate_surface(width, height) {
            Ok(surface) => Ok(ResourceHandle {
                id,
                surface,
                governor: self.clone(),
                released: false,
            }),
            Err(err) => {
                self.deregister(id);
                Err(err)
            }
        }
    }

    fn register(&self, state: &mut GovernorState, label: &str, width: u32, height: u32) -> u64 {
        state.next_id += 1;
        let id = state.next_id;
        state.active.insert(
            id,
            HandleRecord {
                label: label.to_string(),
                width,
                height,
                acquired_at: self.clock.now(),
            },
        );
        state.total_acquired += 1;
        state.peak = state.peak.max(state.active.len());
        log::debug!("🧱 分配处理表面 #{} - 任务: {} 尺寸: {}x{}", id, label, width, height);
        id
    }

    fn update_dimensions(&self, id: u64, width: u32, height: u32) {
        let mut state = self.lock_state_recovering();
        if let Some(record) = state.active.get_mut(&id) {
            record.width = width;
            record.height = height;
        }
    }

    fn deregister(&self, id: u64) {
        let mut state = self.lock_state_recovering();
        if let Some(record) = state.active.remove(&id) {
            state.total_released += 1;
            log::debug!(
                "♻️ 释放处理表面 #{} - 任务: {} 尺寸: {}x{}",
                id,
                record.label,
                record.width,
                record.height
            );
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock_state_recovering().active.len()
    }

    /// 当前在途表面估算占用的字节数。
    pub fn active_bytes(&self) -> u64 {
        self.lock_state_recovering()
            .active
            .values()
            .map(|record| record.width as u64 * record.height as u64 * 4)
            .sum()
    }

    pub fn stats(&self) -> GovernorStats {
        let state = self.lock_state_recovering();
        GovernorStats {
            active: state.active.len(),
            peak: state.peak,
            total_acquired: state.total_acquired,
            total_released: state.total_released,
            force_released: state.force_released,
            rejected: state.rejected,
        }
    }

    /// 强制注销持有时间不短于 `max_age` 的句柄，返回注销数量。
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let mut state = self.lock_state_recovering();
        let stale: Vec<u64> = state
            .active
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.acquired_at) >= max_age)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(record) = state.active.remove(id) {
                log::warn!(
                    "🧹 强制回收未释放的处理表面 #{} - 任务: {} 尺寸: {}x{}",
                    id,
                    record.label,
                    record.width,
                    record.height
                );
            }
        }
        state.force_released += stale.len() as u64;
        stale.len()
    }

    /// 按常规超龄阈值清扫。
    pub fn sweep_stale(&self) -> usize {
        self.sweep(Duration::from_millis(self.config.stale_after_ms))
    }

    /// 堆内存占比超过阈值时按更短的阈值清扫；无遥测时为空操作。
    ///
    /// 返回是否检测到内存压力。
    pub fn check_memory_pressure(&self) -> bool {
        let Some(usage) = self.probe.heap_usage() else {
            return false;
        };
        if usage.limit_bytes == 0 {
            return false;
        }

        let ratio = usage.used_bytes as f64 / usage.limit_bytes as f64;
        if ratio <= self.config.memory_pressure_ratio {
            return false;
        }

        let swept = self.sweep(Duration::from_millis(self.config.pressure_stale_after_ms));
        log::warn!(
            "⚠️ 内存压力 {:.0}%（阈值 {:.0}%），已回收 {} 个处理表面",
            ratio * 100.0,
            self.config.memory_pressure_ratio * 100.0,
            swept
        );
        true
    }

    /// 在当前 tokio 运行时上启动周期清扫任务。
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let governor = self.clone();
        let period = Duration::from_millis(self.config.sweep_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次 tick 立即完成，跳过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                governor.sweep_stale();
                governor.check_memory_pressure();
            }
        })
    }
}

fn allocate_surface(width: u32, height: u32) -> Result<PixelBuffer, ProcessingError> {
    let len = PixelBuffer::byte_len(width, height)
        .map_err(|e| ProcessingError::RenderingUnavailable(e.to_string()))?;

    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        ProcessingError::RenderingUnavailable(format!("无法分配 {}x{} 处理表面：{}", width, height, e))
    })?;
    data.resize(len, 0);

    PixelBuffer::new(width, height, data)
}

/// 一块受管的处理表面（画布的等价物）。
///
/// 释放时清空像素、尺寸收缩到 1x1 并从管理器注销，整个生命周期只会发生一次。
pub struct ResourceHandle {
    id: u64,
    surface: PixelBuffer,
    governor: ResourceGovernor,
    released: bool,
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("dimensions", &self.surface.dimensions())
            .field("released", &self.released)
            .finish()
    }
}

impl ResourceHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn surface(&self) -> &PixelBuffer {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut PixelBuffer {
        &mut self.surface
    }

    /// 用新的像素缓冲替换表面，返回旧缓冲，并同步登记尺寸。
    pub fn replace_surface(&mut self, buffer: PixelBuffer) -> PixelBuffer {
        let (width, height) = buffer.dimensions();
        self.governor.update_dimensions(self.id, width, height);
        std::mem::replace(&mut self.surface, buffer)
    }

    /// 显式释放。
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.surface.shrink_to_minimum();
        self.governor.deregister(self.id);
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}
