//! 原生图形 API 的抽象接口
//!
//! 提交层只通过这些 trait 与底层图形 API 交互：创建命令队列、围栏、
//! 命令列表和提交资源，向硬件队列提交工作，在 GPU / CPU 上等待围栏，
//! 以及呈现交换链。
//!
//! 所有方法都接收 `&self`，实现者自行负责内部同步，
//! 因为同一个对象会同时被 CPU 录制线程和队列的提交线程访问。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::types::{GpuCommand, QueueType, ResourceDesc, ResourceHandle, ResourceStates};
use crate::core::error::Result;

/// 原生设备
pub trait NativeDevice: Send + Sync {
    /// 后端名称，用于日志输出
    fn backend_name(&self) -> &str;

    /// 创建指定类别的硬件命令队列
    fn create_command_queue(&self, queue_type: QueueType) -> Result<Arc<dyn NativeQueue>>;

    /// 创建围栏对象
    fn create_fence(&self, initial_value: u64) -> Result<Arc<dyn NativeFence>>;

    /// 创建命令分配器与命令列表
    fn create_command_list(&self, queue_type: QueueType) -> Result<Arc<dyn NativeCommandList>>;

    /// 创建提交资源
    fn create_committed_resource(
        &self,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<Arc<dyn NativeResource>>;
}

/// 硬件命令队列
pub trait NativeQueue: Send + Sync {
    /// 队列类别
    fn queue_type(&self) -> QueueType;

    /// 按顺序执行已关闭的命令列表
    fn execute_command_lists(&self, lists: &[&dyn NativeCommandList]) -> Result<()>;

    /// 在队列中插入围栏信号
    fn signal(&self, fence: &Arc<dyn NativeFence>, value: u64) -> Result<()>;

    /// 在队列中插入 GPU 端等待，之后的工作在围栏到达 `value` 前不会执行
    fn wait(&self, fence: &Arc<dyn NativeFence>, value: u64) -> Result<()>;

    /// 呈现交换链
    fn present(&self, swap_chain: &Arc<dyn NativeSwapChain>, sync_interval: u32) -> Result<()>;

    /// 多适配器之间的同步，单适配器时无事可做
    fn sync_adapters(&self, _fence: &Arc<dyn NativeFence>, _value: u64) -> Result<()> {
        Ok(())
    }
}

/// 围栏对象
pub trait NativeFence: Send + Sync {
    /// GPU 已完成的值
    fn completed_value(&self) -> u64;

    /// 从 CPU 端设置围栏值
    fn signal(&self, value: u64);

    /// 阻塞调用线程直到围栏到达 `value`
    fn wait_on_cpu(&self, value: u64);

    /// 供后端取回具体类型
    fn as_any(&self) -> &dyn Any;
}

/// 命令分配器与命令列表
pub trait NativeCommandList: Send + Sync {
    /// 队列类别
    fn queue_type(&self) -> QueueType;

    /// 记录一条命令
    fn record(&self, command: GpuCommand) -> Result<()>;

    /// 关闭命令列表，之后只能执行或重置
    fn close(&self) -> Result<()>;

    /// 重置分配器与命令列表以便复用
    fn reset(&self) -> Result<()>;

    /// 供后端在执行时取回具体类型
    fn as_any(&self) -> &dyn Any;
}

/// GPU 驻留的资源对象
///
/// 最后一个 `Arc` 被释放时对象被销毁。
pub trait NativeResource: Send + Sync + fmt::Debug {
    /// 唯一句柄
    fn handle(&self) -> ResourceHandle;

    /// 创建描述
    fn desc(&self) -> &ResourceDesc;
}

/// 交换链
pub trait NativeSwapChain: Send + Sync {
    /// 呈现当前后台缓冲区
    fn present(&self, sync_interval: u32) -> Result<()>;

    /// 后台缓冲区数量
    fn buffer_count(&self) -> u32;
}
