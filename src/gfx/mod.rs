//! 图形后端模块
//!
//! 本模块定义提交层与原生图形 API 之间的边界：
//! - `types`：与 API 无关的队列类别、资源状态、屏障与资源描述
//! - `backend`：原生 API 必须实现的 trait
//! - `software`：进程内的软件 GPU，实现全部 trait，供测试与演示使用

pub mod backend;
pub mod software;
pub mod types;

pub use backend::{
    NativeCommandList, NativeDevice, NativeFence, NativeQueue, NativeResource, NativeSwapChain,
};
pub use software::SoftwareDevice;
pub use types::{
    BarrierSplit, Format, GpuCommand, HeapType, QueueType, ResourceBarrier, ResourceDesc,
    ResourceDimension, ResourceFlags, ResourceHandle, ResourceStates, ShapeHash, ALL_SUBRESOURCES,
};
