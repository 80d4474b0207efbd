//! 提交层
//!
//! 渲染通道通过本模块录制并提交 GPU 工作，不直接接触原生图形 API。
//!
//! # 架构设计
//!
//! - `commands`：围栏、屏障批处理、命令列表、异步提交队列、命令列表池与调度器
//! - `resources`：资源状态 / 围栏跟踪与延迟释放、回收
//! - `device`：把以上组件组合起来的入口
//! - 原生 API 的抽象在 `gfx` 模块中

pub mod commands;
pub mod device;
pub mod resources;

pub use commands::{CommandList, CommandListHandle, CommandScheduler, QueueEvent};
pub use device::Device;
pub use resources::{Resource, ResourceView};
