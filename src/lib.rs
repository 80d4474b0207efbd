//! DistRender 提交层
//!
//! 位于实时渲染器之下的 GPU 命令提交与跨队列同步层：
//! 在图形、计算、复制三类硬件队列上复用命令录制，用单调递增的围栏跟踪
//! 资源的读写冒险，批处理并合并状态转换屏障，并在资源确认不再被 GPU 使用后
//! 回收或复用它们。
//!
//! # 模块结构
//!
//! - `core`: 日志、配置与错误处理
//! - `gfx`: 原生图形 API 的抽象与进程内软件 GPU
//! - `renderer`: 命令列表、提交队列、调度器与资源生命周期跟踪
//!
//! # 使用示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use dist_render_submit::core::SchedulerConfig;
//! use dist_render_submit::gfx::{QueueType, SoftwareDevice};
//! use dist_render_submit::renderer::Device;
//!
//! let device = Device::new(Arc::new(SoftwareDevice::new()), &SchedulerConfig::default())?;
//! if let Some(list) = device.command_list(QueueType::Graphics) {
//!     list.lock().draw(3, 1);
//! }
//! device.end_of_frame(false)?;
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
