//! 错误处理模块
//!
//! 定义了提交层中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 设计原则
//!
//! - 原生 API 的可恢复失败（队列、围栏、命令列表、资源创建失败）以 `Err` 返回
//! - 程序逻辑错误（错误状态下关闭/提交命令列表、等待从未提交的围栏值）
//!   在 debug 构建中断言，在 release 构建中记录日志后继续执行
//! - 错误永远不会以 panic 的形式穿过渲染器边界

use thiserror::Error;

/// 提交层统一的 Result 类型
pub type Result<T> = std::result::Result<T, SubmitError>;

/// 提交层的错误类型
#[derive(Debug, Error)]
pub enum SubmitError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 原生设备错误
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 调度器已关闭
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 原生图形 API 相关的错误
#[derive(Debug, Error)]
pub enum DeviceError {
    /// 命令队列创建失败
    #[error("Command queue creation failed: {0}")]
    QueueCreation(String),

    /// 围栏创建失败
    #[error("Fence creation failed: {0}")]
    FenceCreation(String),

    /// 命令分配器 / 命令列表创建失败
    #[error("Command list creation failed: {0}")]
    CommandListCreation(String),

    /// 提交资源创建失败
    #[error("Committed resource creation failed: {0}")]
    ResourceCreation(String),

    /// 命令列表记录或关闭失败
    #[error("Command recording failed: {0}")]
    Recording(String),

    /// 硬件队列提交失败
    #[error("Submission failed: {0}")]
    Submission(String),

    /// 交换链呈现失败
    #[error("Present failed: {0}")]
    Present(String),

    /// 提交线程创建失败
    #[error("Failed to spawn submission thread: {0}")]
    ThreadSpawn(String),
}

impl SubmitError {
    /// 是否为原生资源分配失败（调用方应视为“本帧未记录任何工作”）
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            SubmitError::Device(
                DeviceError::ResourceCreation(_)
                    | DeviceError::CommandListCreation(_)
                    | DeviceError::QueueCreation(_)
                    | DeviceError::FenceCreation(_)
            )
        )
    }
}
