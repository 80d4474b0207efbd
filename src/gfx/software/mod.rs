//! 软件 GPU 后端
//!
//! 在进程内模拟硬件队列、围栏、命令列表与提交资源，实现 `gfx::backend` 中的全部 trait。
//! 测试和演示程序都运行在这个后端之上：
//!
//! - 每个硬件队列一条 GPU 时间线线程，记录等待 / 执行 / 信号 / 呈现事件
//! - 时间线可以挂起，从而观察在途状态
//! - 统计存活资源数量，可注入分配失败

pub mod command_list;
pub mod fence;
pub mod queue;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::core::error::{DeviceError, Result};
use crate::gfx::backend::{
    NativeCommandList, NativeDevice, NativeFence, NativeQueue, NativeResource, NativeSwapChain,
};
use crate::gfx::types::{QueueType, ResourceDesc, ResourceHandle, ResourceStates};

pub use command_list::SoftwareCommandList;
pub use fence::SoftwareFence;
pub use queue::{SoftwareQueue, TimelineEvent};

#[derive(Default)]
struct Counters {
    next_fence: AtomicU64,
    next_resource: AtomicU64,
    live_resources: AtomicUsize,
    allocations: AtomicUsize,
    failing_allocations: AtomicUsize,
}

/// 软件设备
#[derive(Default)]
pub struct SoftwareDevice {
    counters: Arc<Counters>,
    queues: Mutex<HashMap<QueueType, Arc<SoftwareQueue>>>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已创建的某类队列（每类只创建一个）
    pub fn queue(&self, queue_type: QueueType) -> Option<Arc<SoftwareQueue>> {
        self.queues.lock().get(&queue_type).cloned()
    }

    /// 仍然存活的资源对象数量
    pub fn live_resource_count(&self) -> usize {
        self.counters.live_resources.load(Ordering::Acquire)
    }

    /// 累计的真实分配次数
    pub fn allocation_count(&self) -> usize {
        self.counters.allocations.load(Ordering::Acquire)
    }

    /// 让接下来的 `count` 次资源分配失败
    pub fn fail_next_allocations(&self, count: usize) {
        self.counters.failing_allocations.store(count, Ordering::Release);
    }

    fn take_failure(&self) -> bool {
        self.counters
            .failing_allocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl NativeDevice for SoftwareDevice {
    fn backend_name(&self) -> &str {
        "Software"
    }

    fn create_command_queue(&self, queue_type: QueueType) -> Result<Arc<dyn NativeQueue>> {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get(&queue_type) {
            return Ok(Arc::clone(queue) as Arc<dyn NativeQueue>);
        }

        let queue = Arc::new(SoftwareQueue::new(queue_type)?);
        queues.insert(queue_type, Arc::clone(&queue));
        debug!(queue = %queue_type, "Software queue created");
        Ok(queue as Arc<dyn NativeQueue>)
    }

    fn create_fence(&self, initial_value: u64) -> Result<Arc<dyn NativeFence>> {
        let id = self.counters.next_fence.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(SoftwareFence::new(id, initial_value)))
    }

    fn create_command_list(&self, queue_type: QueueType) -> Result<Arc<dyn NativeCommandList>> {
        Ok(Arc::new(SoftwareCommandList::new(queue_type)))
    }

    fn create_committed_resource(
        &self,
        desc: &ResourceDesc,
        _initial_state: ResourceStates,
    ) -> Result<Arc<dyn NativeResource>> {
        if self.take_failure() {
            return Err(DeviceError::ResourceCreation(format!(
                "out of memory allocating {:?} of {} bytes",
                desc.dimension, desc.width
            ))
            .into());
        }

        let handle = ResourceHandle(self.counters.next_resource.fetch_add(1, Ordering::AcqRel) + 1);
        self.counters.allocations.fetch_add(1, Ordering::AcqRel);
        self.counters.live_resources.fetch_add(1, Ordering::AcqRel);

        Ok(Arc::new(SoftwareResource {
            handle,
            desc: *desc,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// 软件资源对象
pub struct SoftwareResource {
    handle: ResourceHandle,
    desc: ResourceDesc,
    counters: Arc<Counters>,
}

impl fmt::Debug for SoftwareResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareResource")
            .field("handle", &self.handle)
            .field("dimension", &self.desc.dimension)
            .field("width", &self.desc.width)
            .finish()
    }
}

impl NativeResource for SoftwareResource {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }

    fn desc(&self) -> &ResourceDesc {
        &self.desc
    }
}

impl Drop for SoftwareResource {
    fn drop(&mut self) {
        self.counters.live_resources.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 软件交换链
pub struct SoftwareSwapChain {
    buffer_count: u32,
    presents: AtomicU64,
}

impl SoftwareSwapChain {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count,
            presents: AtomicU64::new(0),
        }
    }

    /// 已完成的呈现次数
    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::Acquire)
    }
}

impl NativeSwapChain for SoftwareSwapChain {
    fn present(&self, _sync_interval: u32) -> Result<()> {
        self.presents.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::types::HeapType;

    #[test]
    fn test_resource_accounting() {
        let device = SoftwareDevice::new();
        let desc = ResourceDesc::buffer(256, HeapType::Default);

        let a = device.create_committed_resource(&desc, ResourceStates::COMMON).unwrap();
        let b = device.create_committed_resource(&desc, ResourceStates::COMMON).unwrap();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(device.live_resource_count(), 2);

        drop(a);
        assert_eq!(device.live_resource_count(), 1);
        assert_eq!(device.allocation_count(), 2);
    }

    #[test]
    fn test_injected_allocation_failure() {
        let device = SoftwareDevice::new();
        let desc = ResourceDesc::buffer(64, HeapType::Upload);

        device.fail_next_allocations(1);
        assert!(device.create_committed_resource(&desc, ResourceStates::GENERIC_READ).is_err());
        assert!(device.create_committed_resource(&desc, ResourceStates::GENERIC_READ).is_ok());
    }

    #[test]
    fn test_one_queue_per_class() {
        let device = SoftwareDevice::new();
        device.create_command_queue(QueueType::Compute).unwrap();
        device.create_command_queue(QueueType::Compute).unwrap();
        assert!(device.queue(QueueType::Compute).is_some());
        assert!(device.queue(QueueType::Copy).is_none());
    }
}
