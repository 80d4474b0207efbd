//! 配置管理模块
//!
//! 提供提交层调优参数的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [scheduler]
//! async_graphics = true
//! async_compute = true
//! async_copy = true
//! max_frame_latency = 1          # 0 表示不限制 CPU 领先 GPU 的帧数
//! max_pending_presents = 1
//! barrier_batching = "fuse"      # off, batch, fuse
//! dedupe_uav_barriers = false
//! pending_barrier_capacity = 256
//! in_order_submission = true
//! recycle_heap_frames = 30
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::gfx::QueueType;
use crate::renderer::commands::scheduler::FRAME_FENCES;

/// 提交层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 调度器配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 调度器配置
///
/// 由宿主应用提供，提交层只读取不拥有。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 图形队列是否使用异步提交线程
    #[serde(default = "default_async")]
    pub async_graphics: bool,

    /// 计算队列是否使用异步提交线程
    #[serde(default = "default_async")]
    pub async_compute: bool,

    /// 复制队列是否使用异步提交线程
    #[serde(default = "default_async")]
    pub async_copy: bool,

    /// CPU 最多领先 GPU 的帧数（0 表示不限制）
    #[serde(default = "default_max_frame_latency")]
    pub max_frame_latency: u32,

    /// 同时在途的 Present 数量上限
    #[serde(default = "default_max_pending_presents")]
    pub max_pending_presents: u32,

    /// 屏障批处理模式
    #[serde(default = "default_barrier_batching")]
    pub barrier_batching: BarrierBatching,

    /// 合并相同资源的 UAV 屏障
    #[serde(default = "default_dedupe_uav_barriers")]
    pub dedupe_uav_barriers: bool,

    /// 待刷新屏障缓冲区容量
    #[serde(default = "default_pending_barrier_capacity")]
    pub pending_barrier_capacity: usize,

    /// 硬件队列是否严格按提交顺序执行
    #[serde(default = "default_in_order_submission")]
    pub in_order_submission: bool,

    /// 回收堆中的对象闲置多少帧后被驱逐
    #[serde(default = "default_recycle_heap_frames")]
    pub recycle_heap_frames: usize,
}

/// 屏障批处理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierBatching {
    /// 立即写入原生命令列表
    Off,
    /// 缓冲后在下一个绘制/分派/复制前一次性写入
    Batch,
    /// 缓冲并合并同一子资源上的连续转换
    Fuse,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_async() -> bool { true }
fn default_max_frame_latency() -> u32 { 1 }
fn default_max_pending_presents() -> u32 { 1 }
fn default_barrier_batching() -> BarrierBatching { BarrierBatching::Fuse }
fn default_dedupe_uav_barriers() -> bool { false }
fn default_pending_barrier_capacity() -> usize { 256 }
fn default_in_order_submission() -> bool { true }
fn default_recycle_heap_frames() -> usize { 30 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "distrender_submit.log".to_string() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            async_graphics: default_async(),
            async_compute: default_async(),
            async_copy: default_async(),
            max_frame_latency: default_max_frame_latency(),
            max_pending_presents: default_max_pending_presents(),
            barrier_batching: default_barrier_batching(),
            dedupe_uav_barriers: default_dedupe_uav_barriers(),
            pending_barrier_capacity: default_pending_barrier_capacity(),
            in_order_submission: default_in_order_submission(),
            recycle_heap_frames: default_recycle_heap_frames(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl SchedulerConfig {
    /// 指定队列是否启用异步提交
    pub fn is_async(&self, queue: QueueType) -> bool {
        match queue {
            QueueType::Graphics => self.async_graphics,
            QueueType::Compute => self.async_compute,
            QueueType::Copy => self.async_copy,
        }
    }

    /// 所有队列都改为同步提交（调试用）
    pub fn with_synchronous_submission(mut self) -> Self {
        self.async_graphics = false;
        self.async_compute = false;
        self.async_copy = false;
        self
    }

    /// 验证调度器参数
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_latency as usize >= FRAME_FENCES {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_frame_latency".to_string(),
                reason: format!("must be smaller than {}", FRAME_FENCES),
            }.into());
        }

        if self.max_pending_presents == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_pending_presents".to_string(),
                reason: "at least one present must be allowed in flight".to_string(),
            }.into());
        }

        if self.pending_barrier_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.pending_barrier_capacity".to_string(),
                reason: "pending barrier buffer cannot be empty".to_string(),
            }.into());
        }

        if self.recycle_heap_frames == 0 || self.recycle_heap_frames >= FRAME_FENCES {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.recycle_heap_frames".to_string(),
                reason: format!("must be in 1..{}", FRAME_FENCES),
            }.into());
        }

        Ok(())
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--sync-submission`: 所有队列改为同步提交
    /// - `--max-frame-latency <value>`: 设置最大在途帧数
    /// - `--barriers <off|batch|fuse>`: 设置屏障批处理模式
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--sync-submission") {
            self.scheduler = self.scheduler.clone().with_synchronous_submission();
        }

        if let Some(idx) = args.iter().position(|a| a == "--max-frame-latency") {
            if let Some(value) = args.get(idx + 1).and_then(|s| s.parse().ok()) {
                self.scheduler.max_frame_latency = value;
            }
        }

        if let Some(idx) = args.iter().position(|a| a == "--barriers") {
            match args.get(idx + 1).map(String::as_str) {
                Some("off") => self.scheduler.barrier_batching = BarrierBatching::Off,
                Some("batch") => self.scheduler.barrier_batching = BarrierBatching::Batch,
                Some("fuse") => self.scheduler.barrier_batching = BarrierBatching::Fuse,
                _ => {}
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()
    }
}
