//! 提交层设备
//!
//! 把原生设备、释放 / 回收堆和命令调度器组合在一起，是渲染通道使用提交层的入口。
//! 资源通过它创建，释放时自动进入释放堆；每帧调用一次 `end_of_frame`。

use std::sync::Arc;
use tracing::{debug, info};

use crate::core::config::SchedulerConfig;
use crate::core::error::Result;
use crate::gfx::backend::NativeDevice;
use crate::gfx::types::{QueueType, ResourceDesc, ResourceStates};
use crate::renderer::commands::{CommandListHandle, CommandScheduler, FenceSet};
use crate::renderer::resources::{HeapMovement, HeapStats, Resource, ResourceHeaps};

/// 提交层设备
pub struct Device {
    native: Arc<dyn NativeDevice>,
    heaps: Arc<ResourceHeaps>,
    scheduler: CommandScheduler,
}

impl Device {
    /// 创建设备并开始调度
    pub fn new(native: Arc<dyn NativeDevice>, config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let heaps = ResourceHeaps::new(Arc::clone(&native));
        let scheduler = CommandScheduler::new(Arc::clone(&native), Arc::clone(&heaps), config)?;
        scheduler.begin_scheduling()?;

        info!(backend = native.backend_name(), "Submission device created");
        Ok(Self { native, heaps, scheduler })
    }

    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    pub fn heaps(&self) -> &Arc<ResourceHeaps> {
        &self.heaps
    }

    pub fn fences(&self) -> &Arc<FenceSet> {
        self.scheduler.fences()
    }

    /// 某个队列的当前命令列表
    pub fn command_list(&self, queue_type: QueueType) -> Option<CommandListHandle> {
        self.scheduler.command_list(queue_type)
    }

    /// 创建提交资源
    ///
    /// `reusable` 为真时资源释放后进入回收堆，供相同形状的请求复用。
    pub fn create_committed_resource(
        &self,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
        reusable: bool,
    ) -> Result<Arc<Resource>> {
        let created = self.heaps.create_or_reuse_committed_resource(desc, initial_state)?;
        Ok(Arc::new(Resource::new(
            created.object,
            created.state,
            reusable,
            Arc::downgrade(&self.heaps),
        )))
    }

    /// 创建与 `original` 同形状的资源
    pub fn duplicate_resource(&self, original: &Resource, initial_state: ResourceStates) -> Result<Arc<Resource>> {
        let created = self
            .heaps
            .duplicate_committed_resource(original.native().as_ref(), initial_state)?;
        Ok(Arc::new(Resource::new(
            created.object,
            created.state,
            original.is_reusable(),
            Arc::downgrade(&self.heaps),
        )))
    }

    /// GPU 仍在使用 `resource` 时换成一个同形状的新资源
    ///
    /// 旧资源的引用被释放后经由释放堆回收，CPU 不需要等待。
    pub fn substitute_used_resource(&self, resource: &mut Arc<Resource>, initial_state: ResourceStates) -> Result<bool> {
        if !resource.is_used(self.fences()) {
            return Ok(false);
        }
        let replacement = self.duplicate_resource(resource, initial_state)?;
        debug!(old = %resource.handle(), new = %replacement.handle(), "Substituting used resource");
        *resource = replacement;
        Ok(true)
    }

    /// 结束一帧
    pub fn end_of_frame(&self, wait: bool) -> Result<HeapMovement> {
        self.scheduler.end_of_frame(wait)
    }

    /// 提交全部工作并等待 GPU 空闲
    pub fn flush_and_wait_for_gpu(&self) -> Result<()> {
        self.scheduler.flush(true)
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heaps.stats()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        self.heaps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::types::{Format, HeapType};
    use crate::gfx::SoftwareDevice;
    use crate::renderer::resources::ResourceView;

    fn device_with(config: SchedulerConfig) -> (Arc<SoftwareDevice>, Device) {
        let native = Arc::new(SoftwareDevice::new());
        let device = Device::new(native.clone(), &config).unwrap();
        (native, device)
    }

    fn texture_desc() -> ResourceDesc {
        ResourceDesc::texture_2d(128, 128, Format::R16G16B16A16Float, 1, 1)
    }

    fn use_on_graphics(device: &Device, resource: &Resource) {
        let handle = device.command_list(QueueType::Graphics).unwrap();
        let mut list = handle.lock();
        list.clear_render_target(resource, &ResourceView::whole(), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.recycle_heap_frames = 0;
        assert!(Device::new(Arc::new(SoftwareDevice::new()), &config).is_err());
    }

    #[test]
    fn test_recycle_round_trip() {
        let (native, device) = device_with(SchedulerConfig::default());
        let desc = texture_desc();

        let first = device
            .create_committed_resource(&desc, ResourceStates::COMMON, true)
            .unwrap();
        let first_handle = first.handle();
        use_on_graphics(&device, &first);
        drop(first);

        let movement = device.end_of_frame(true).unwrap();
        assert_eq!(movement.recycled, 1);

        let second = device
            .create_committed_resource(&desc, ResourceStates::COMMON, true)
            .unwrap();
        assert_eq!(second.handle(), first_handle);
        assert_eq!(second.shape_hash(), desc.shape_hash());
        assert_eq!(second.desc().shape_hash(), desc.shape_hash());
        // 复用对象保留了最后的状态
        assert_eq!(second.current_state(), ResourceStates::RENDER_TARGET);
        assert_eq!(native.allocation_count(), 1);
        assert_eq!(device.heap_stats().reuses, 1);
    }

    #[test]
    fn test_recycled_objects_are_evicted() {
        let mut config = SchedulerConfig::default();
        config.recycle_heap_frames = 2;
        let (native, device) = device_with(config);

        let resource = device
            .create_committed_resource(&texture_desc(), ResourceStates::COMMON, true)
            .unwrap();
        use_on_graphics(&device, &resource);
        drop(resource);

        device.end_of_frame(true).unwrap();
        assert_eq!(device.heaps().recyclable_count(), 1);
        device.end_of_frame(true).unwrap();
        assert_eq!(device.heaps().recyclable_count(), 1);

        let movement = device.end_of_frame(true).unwrap();
        assert_eq!(movement.evicted, 1);
        assert_eq!(native.live_resource_count(), 0);
    }

    #[test]
    fn test_gc_frees_at_first_completed_pass() {
        let (native, device) = device_with(SchedulerConfig::default());
        let resource = device
            .create_committed_resource(&ResourceDesc::buffer(256, HeapType::Upload), ResourceStates::GENERIC_READ, false)
            .unwrap();
        {
            let handle = device.command_list(QueueType::Graphics).unwrap();
            let mut list = handle.lock();
            list.prepare_vertex_buffer_usage(&resource);
            list.draw(3, 1);
        }
        drop(resource);
        assert_eq!(device.heaps().pending_release_count(), 1);

        let movement = device.end_of_frame(true).unwrap();
        assert_eq!(movement.freed, 1);
        assert_eq!(native.live_resource_count(), 0);

        // 之后的帧没有残留
        for _ in 0..3 {
            assert_eq!(device.end_of_frame(true).unwrap(), HeapMovement::default());
        }
    }

    #[test]
    fn test_substitute_only_when_in_use() {
        let (native, device) = device_with(SchedulerConfig::default());
        let mut resource = device
            .create_committed_resource(&ResourceDesc::buffer(1024, HeapType::Upload), ResourceStates::GENERIC_READ, true)
            .unwrap();
        assert!(!device.substitute_used_resource(&mut resource, ResourceStates::GENERIC_READ).unwrap());

        {
            let handle = device.command_list(QueueType::Graphics).unwrap();
            let mut list = handle.lock();
            list.prepare_vertex_buffer_usage(&resource);
            list.draw(3, 1);
        }
        let original = resource.handle();
        device.scheduler().submit_commands(QueueType::Graphics, false).unwrap();

        // 提交线程可能已经完成，只在仍被使用时才会替换
        if resource.is_used(device.fences()) {
            assert!(device.substitute_used_resource(&mut resource, ResourceStates::GENERIC_READ).unwrap());
            assert_ne!(resource.handle(), original);
            assert_eq!(native.live_resource_count(), 2);
        }
        device.flush_and_wait_for_gpu().unwrap();
        assert!(!resource.is_used(device.fences()));
    }

    #[test]
    fn test_allocation_failure_is_recoverable() {
        let (native, device) = device_with(SchedulerConfig::default());
        native.fail_next_allocations(1);
        let result = device.create_committed_resource(&texture_desc(), ResourceStates::COMMON, false);
        assert!(result.unwrap_err().is_allocation_failure());

        // 本帧照常结束
        device.end_of_frame(false).unwrap();
        assert!(device
            .create_committed_resource(&texture_desc(), ResourceStates::COMMON, false)
            .is_ok());
    }

    #[test]
    fn test_drop_releases_everything() {
        let (native, device) = device_with(SchedulerConfig::default());
        let resource = device
            .create_committed_resource(&texture_desc(), ResourceStates::COMMON, true)
            .unwrap();
        use_on_graphics(&device, &resource);
        drop(resource);
        drop(device);
        assert_eq!(native.live_resource_count(), 0);
    }
}
