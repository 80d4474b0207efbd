//! 命令列表模块
//!
//! 命令列表是一次可记录的 GPU 工作单元，拥有待刷新屏障缓冲区、依赖围栏表和生命周期状态机：
//!
//! ```text
//! Free ─register→ Started ─close→ Completed ─schedule→ Scheduled ─submit→ Submitted
//!   ↑                                                                       │
//!   └──────── reset ←── Clearing ←── clear ←── Finished ←── GPU 完成 ───────┘
//! ```
//!
//! 注册时从池的 `current` 围栏分配值，因此即使录制乱序结束，
//! 按围栏值等待总是单调的。没有记录任何 GPU 命令、围栏值也没有写入任何资源的列表
//! 在调度时回退围栏值，被视为从未存在（围栏值变为 0）。

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::barrier::PendingBarriers;
use super::queue::AsyncCommandQueue;
use super::sync::{AccessKind, DependencySet, FenceSet, FenceValues};
use crate::core::config::SchedulerConfig;
use crate::core::error::Result;
use crate::gfx::backend::NativeCommandList;
use crate::gfx::types::{GpuCommand, QueueType, ResourceBarrier, ResourceStates};
use crate::renderer::resources::{Resource, ResourceView};

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ListState {
    /// 空闲，等待注册
    Free = 0,
    /// 正在记录
    Started = 1,
    /// 已关闭
    Completed = 2,
    /// 已交给池等待提交
    Scheduled = 3,
    /// 已提交到异步队列
    Submitted = 4,
    /// GPU 已执行完毕
    Finished = 5,
    /// 正在重置
    Clearing = 6,
}

impl ListState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ListState::Started,
            2 => ListState::Completed,
            3 => ListState::Scheduled,
            4 => ListState::Submitted,
            5 => ListState::Finished,
            6 => ListState::Clearing,
            _ => ListState::Free,
        }
    }
}

/// 可以在不锁命令列表的情况下读取的状态
///
/// 池和提交线程通过它观察列表，录制线程持有列表锁时也不会阻塞它们。
#[derive(Debug)]
pub struct ListStatus {
    queue_type: QueueType,
    state: AtomicU8,
    fence_value: AtomicU64,
}

impl ListStatus {
    fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            state: AtomicU8::new(ListState::Free as u8),
            fence_value: AtomicU64::new(0),
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn state(&self) -> ListState {
        ListState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ListState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// 分配的围栏值，0 表示列表已回退或未注册
    pub fn fence_value(&self) -> u64 {
        self.fence_value.load(Ordering::Acquire)
    }

    fn set_fence_value(&self, value: u64) {
        self.fence_value.store(value, Ordering::Release);
    }

    /// 已提交且 GPU 已完成（回退的列表提交后立即视为完成）
    pub fn is_finished_on_gpu(&self, fences: &FenceSet) -> bool {
        matches!(self.state(), ListState::Submitted | ListState::Finished)
            && fences.is_completed(self.fence_value(), self.queue_type)
    }
}

/// 命令列表的统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStats {
    /// 记录的命令数（含屏障槽位）
    pub commands: u32,
    /// 屏障槽位数
    pub barriers: u32,
    /// 提交时插入的 GPU 等待数
    pub gpu_waits: u32,
}

/// 命令列表
pub struct CommandList {
    queue_type: QueueType,
    native: Arc<dyn NativeCommandList>,
    fences: Arc<FenceSet>,
    status: Arc<ListStatus>,
    barriers: PendingBarriers,
    dependencies: DependencySet,
    in_order: bool,
    stats: ListStats,
    /// 围栏值已写入某个资源的访问记录
    fences_published: bool,
}

impl CommandList {
    pub(crate) fn new(
        native: Arc<dyn NativeCommandList>,
        fences: Arc<FenceSet>,
        config: &SchedulerConfig,
    ) -> Self {
        let queue_type = native.queue_type();
        Self {
            queue_type,
            native,
            fences,
            status: Arc::new(ListStatus::new(queue_type)),
            barriers: PendingBarriers::new(
                config.barrier_batching,
                config.dedupe_uav_barriers,
                config.pending_barrier_capacity,
            ),
            dependencies: DependencySet::new(),
            in_order: config.in_order_submission,
            stats: ListStats::default(),
            fences_published: false,
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn state(&self) -> ListState {
        self.status.state()
    }

    pub fn fence_value(&self) -> u64 {
        self.status.fence_value()
    }

    pub fn status(&self) -> &Arc<ListStatus> {
        &self.status
    }

    pub fn native(&self) -> &Arc<dyn NativeCommandList> {
        &self.native
    }

    pub fn fences(&self) -> &Arc<FenceSet> {
        &self.fences
    }

    /// 累积的依赖围栏表
    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    pub fn stats(&self) -> ListStats {
        self.stats
    }

    /// 是否记录过 GPU 命令
    pub fn is_utilized(&self) -> bool {
        self.stats.commands > 0
    }

    /// 围栏值是否已被资源记录
    pub fn has_published_fence(&self) -> bool {
        self.fences_published
    }

    /// 调度时能否回退围栏值
    ///
    /// 资源上已经记录了本列表的围栏值时必须发出信号，否则等待者永远无法满足。
    pub fn is_rewindable(&self) -> bool {
        !self.is_utilized() && !self.fences_published
    }

    /// 缓冲中的屏障数
    pub fn pending_barrier_count(&self) -> usize {
        self.barriers.len()
    }

    // ------------------------------------------------------------------
    // 生命周期
    // ------------------------------------------------------------------

    /// 以新的围栏值开始记录
    pub(crate) fn register(&mut self, fence_value: u64) {
        debug_assert_eq!(self.state(), ListState::Free, "registering a list that is still in use");

        self.barriers.clear();
        self.dependencies.clear();
        self.stats = ListStats::default();
        self.fences_published = false;
        self.status.set_fence_value(fence_value);
        self.status.set_state(ListState::Started);

        trace!(queue = %self.queue_type, fence = fence_value, "Command list registered");
    }

    /// 结束记录
    ///
    /// 只有实际使用过的列表才会刷新屏障并关闭原生命令列表。
    pub fn close(&mut self) -> Result<()> {
        if self.state() != ListState::Started {
            error!(
                queue = %self.queue_type,
                state = ?self.state(),
                "Closing a command list that is not recording"
            );
            debug_assert!(false, "closing a command list in state {:?}", self.state());
            return Ok(());
        }

        let result = if self.is_utilized() {
            self.flush_barriers();
            self.native.close()
        } else {
            Ok(())
        };

        self.status.set_state(ListState::Completed);
        result
    }

    /// 交给池调度；空列表若仍占用最新的围栏值则回退
    pub(crate) fn schedule(&mut self) {
        if self.state() >= ListState::Scheduled {
            return;
        }
        self.status.set_state(ListState::Scheduled);

        let fence_value = self.fence_value();
        if self.is_rewindable() && self.fences.rewind_current_value(self.queue_type, fence_value) {
            // 列表视为从未存在，所有对该值的等待立即满足
            self.status.set_fence_value(0);
            trace!(queue = %self.queue_type, fence = fence_value, "Empty command list rewound");
        }
    }

    /// 提交到异步队列
    ///
    /// 先插入对其它队列的 GPU 等待，再执行，最后发出自己的围栏信号。
    /// 未使用但未能回退的列表只发信号，保证等待它的围栏值能够完成；
    /// 若资源记录了它的围栏值，信号之前仍要等待它继承的依赖。
    pub(crate) fn submit(&mut self, queue: &AsyncCommandQueue) {
        if self.state() != ListState::Scheduled {
            error!(
                queue = %self.queue_type,
                state = ?self.state(),
                "Submitting a command list that was not scheduled"
            );
            debug_assert!(false, "submitting a command list in state {:?}", self.state());
            return;
        }

        let fence_value = self.fence_value();

        if self.is_utilized() || (self.fences_published && fence_value != 0) {
            let waits = self.gpu_wait_values();
            if !waits.is_zero() {
                self.stats.gpu_waits += waits.0.iter().filter(|&&v| v != 0).count() as u32;
                queue.wait_for_fences(waits);
            }
        }
        if self.is_utilized() {
            queue.execute_command_list(Arc::clone(&self.native));
        }

        if fence_value != 0 {
            self.fences.set_submitted_value(self.queue_type, fence_value);
            queue.signal_fence(fence_value);
        }

        self.status.set_state(ListState::Submitted);
        trace!(queue = %self.queue_type, fence = fence_value, waits = self.stats.gpu_waits, "Command list submitted");
    }

    /// 提交前需要在 GPU 上等待的围栏值
    ///
    /// “任意”依赖取读、写中较严格者；自己的队列按顺序执行时不等待，
    /// 不小于自身围栏值的等待会自锁，也被屏蔽；已完成的值直接跳过。
    fn gpu_wait_values(&mut self) -> FenceValues {
        let strictest = self.dependencies.strictest();
        self.dependencies[AccessKind::Any] = strictest;

        let own = self.fence_value();
        let mut waits = strictest;
        for queue in QueueType::ALL {
            let value = waits[queue];
            let masked = if queue == self.queue_type {
                self.in_order || value >= own
            } else {
                false
            };
            if masked || self.fences.is_completed(value, queue) {
                waits[queue] = 0;
            }
        }
        waits
    }

    /// 在 CPU 上等待列表执行完毕
    pub fn wait_for_finish_on_cpu(&self) {
        self.fences.wait_for_fence(self.fence_value(), self.queue_type);
    }

    // ------------------------------------------------------------------
    // 屏障
    // ------------------------------------------------------------------

    /// 记录资源屏障（按配置批处理 / 合并）
    pub fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        if barriers.is_empty() {
            return;
        }
        debug_assert_eq!(self.state(), ListState::Started, "recording into a closed list");

        let admission = self.barriers.push(barriers);
        if !admission.immediate.is_empty() {
            self.record_native(GpuCommand::Barriers(admission.immediate));
        }
        // 合并掉的槽位从计数中扣除
        self.stats.commands = self.stats.commands.saturating_add_signed(admission.recorded as i32);
        self.stats.barriers = self.stats.barriers.saturating_add_signed(admission.recorded as i32);
    }

    /// 把缓冲的屏障写入原生命令列表
    pub fn flush_barriers(&mut self) {
        if let Some(barriers) = self.barriers.take() {
            self.record_native(GpuCommand::Barriers(barriers));
        }
    }

    fn record_native(&self, command: GpuCommand) {
        if let Err(e) = self.native.record(command) {
            error!(queue = %self.queue_type, "Failed to record command: {}", e);
        }
    }

    /// 记录一条 GPU 命令，之前缓冲的屏障先写入
    pub fn record(&mut self, command: GpuCommand) {
        debug_assert_eq!(self.state(), ListState::Started, "recording into a closed list");
        self.flush_barriers();
        self.record_native(command);
        self.stats.commands += 1;
    }

    // ------------------------------------------------------------------
    // 围栏依赖
    // ------------------------------------------------------------------

    /// 把资源在 `kind` 访问上的围栏记录并入本列表的依赖
    pub fn max_resource_fence_value(&mut self, resource: &Resource, kind: AccessKind) {
        let mut values = resource.fence_values(kind);
        if self.in_order {
            values[self.queue_type] = 0;
        }
        self.dependencies.accumulate(kind, values);
    }

    /// 把资源在 `kind` 访问上的围栏更新为本列表的围栏值
    pub fn set_resource_fence_value(&mut self, resource: &Resource, kind: AccessKind) {
        let fence_value = self.fence_value();
        if fence_value != 0 {
            self.fences_published = true;
        }
        resource.set_fence_value(kind, self.queue_type, fence_value);
    }

    /// 登记一次资源访问
    ///
    /// 读等待此前的写，写等待此前的任意访问。
    pub fn track_resource_usage(&mut self, resource: &Resource, access: AccessKind) {
        let dependency = match access {
            AccessKind::Read => AccessKind::Write,
            AccessKind::Write | AccessKind::Any => AccessKind::Any,
        };
        self.max_resource_fence_value(resource, dependency);
        self.set_resource_fence_value(resource, access);
    }

    fn prepare_usage(
        &mut self,
        resource: &Resource,
        view: &ResourceView,
        desired: ResourceStates,
        access: AccessKind,
    ) {
        let target = resource.select_queue_for_transition_barrier(self.queue_type, desired);
        if target != self.queue_type {
            warn!(
                resource = %resource.handle(),
                queue = %self.queue_type,
                desired = ?desired,
                "Transition is not supported on this queue"
            );
        }
        resource.transition_barrier_view(self, view, desired);
        self.track_resource_usage(resource, access);
    }

    /// 绑定为渲染目标
    pub fn prepare_render_target_usage(&mut self, resource: &Resource, view: &ResourceView) {
        self.prepare_usage(resource, view, ResourceStates::RENDER_TARGET, AccessKind::Write);
    }

    /// 绑定为深度目标
    pub fn prepare_depth_target_usage(&mut self, resource: &Resource, view: &ResourceView, read_only: bool) {
        if read_only {
            self.prepare_usage(resource, view, ResourceStates::DEPTH_READ, AccessKind::Read);
        } else {
            self.prepare_usage(resource, view, ResourceStates::DEPTH_WRITE, AccessKind::Write);
        }
    }

    /// 绑定为 UAV
    pub fn prepare_uav_usage(&mut self, resource: &Resource, view: &ResourceView) {
        self.prepare_usage(resource, view, ResourceStates::UNORDERED_ACCESS, AccessKind::Write);
    }

    /// 绑定为着色器资源
    pub fn prepare_shader_resource_usage(&mut self, resource: &Resource, view: &ResourceView) {
        let desired = match self.queue_type {
            QueueType::Graphics => {
                ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE
            }
            _ => ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        };
        self.prepare_usage(resource, view, desired, AccessKind::Read);
    }

    /// 绑定为顶点 / 常量缓冲区
    pub fn prepare_vertex_buffer_usage(&mut self, resource: &Resource) {
        self.prepare_usage(
            resource,
            &ResourceView::whole(),
            ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
            AccessKind::Read,
        );
    }

    /// 绑定为索引缓冲区
    pub fn prepare_index_buffer_usage(&mut self, resource: &Resource) {
        self.prepare_usage(resource, &ResourceView::whole(), ResourceStates::INDEX_BUFFER, AccessKind::Read);
    }

    /// 作为复制源
    pub fn prepare_copy_source_usage(&mut self, resource: &Resource) {
        self.prepare_usage(resource, &ResourceView::whole(), ResourceStates::COPY_SOURCE, AccessKind::Read);
    }

    /// 作为复制目标
    pub fn prepare_copy_dest_usage(&mut self, resource: &Resource) {
        self.prepare_usage(resource, &ResourceView::whole(), ResourceStates::COPY_DEST, AccessKind::Write);
    }

    /// 交给交换链呈现
    pub fn prepare_present_usage(&mut self, resource: &Resource) {
        self.prepare_usage(resource, &ResourceView::whole(), ResourceStates::PRESENT, AccessKind::Read);
    }

    // ------------------------------------------------------------------
    // GPU 命令
    // ------------------------------------------------------------------

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(GpuCommand::Draw { vertex_count, instance_count });
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.record(GpuCommand::DrawIndexed { index_count, instance_count });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(GpuCommand::Dispatch { x, y, z });
    }

    /// 整体复制资源
    pub fn copy_resource(&mut self, dst: &Resource, src: &Resource) {
        self.prepare_copy_dest_usage(dst);
        self.prepare_copy_source_usage(src);
        self.record(GpuCommand::CopyResource { dst: dst.handle(), src: src.handle() });
    }

    /// 复制缓冲区区间
    pub fn copy_buffer_region(&mut self, dst: &Resource, dst_offset: u64, src: &Resource, src_offset: u64, size: u64) {
        self.prepare_copy_dest_usage(dst);
        self.prepare_copy_source_usage(src);
        self.record(GpuCommand::CopyBufferRegion {
            dst: dst.handle(),
            dst_offset,
            src: src.handle(),
            src_offset,
            size,
        });
    }

    pub fn clear_render_target(&mut self, target: &Resource, view: &ResourceView, color: [f32; 4]) {
        self.prepare_render_target_usage(target, view);
        self.record(GpuCommand::ClearRenderTarget { target: target.handle(), color });
    }

    pub fn clear_depth_stencil(&mut self, target: &Resource, view: &ResourceView, depth: f32, stencil: u8) {
        self.prepare_depth_target_usage(target, view, false);
        self.record(GpuCommand::ClearDepthStencil { target: target.handle(), depth, stencil });
    }

    pub fn clear_unordered_access(&mut self, target: &Resource, view: &ResourceView, values: [u32; 4]) {
        self.prepare_uav_usage(target, view);
        self.record(GpuCommand::ClearUnorderedAccess { target: target.handle(), values });
    }

    /// 丢弃资源内容（资源保持当前状态，只登记写访问）
    pub fn discard_resource(&mut self, resource: &Resource) {
        self.track_resource_usage(resource, AccessKind::Write);
        self.record(GpuCommand::Discard { resource: resource.handle() });
    }

    pub fn begin_query(&mut self, index: u32) {
        self.record(GpuCommand::BeginQuery { index });
    }

    pub fn end_query(&mut self, index: u32) {
        self.record(GpuCommand::EndQuery { index });
    }

    /// 把查询结果解析到缓冲区
    pub fn resolve_query_data(&mut self, dst: &Resource, start: u32, count: u32) {
        self.prepare_copy_dest_usage(dst);
        self.record(GpuCommand::ResolveQuery { dst: dst.handle(), start, count });
    }
}

/// 共享的命令列表句柄
///
/// 池、调度器和录制代码都持有同一个句柄；状态与围栏值可以不加锁读取。
#[derive(Clone)]
pub struct CommandListHandle {
    list: Arc<Mutex<CommandList>>,
    status: Arc<ListStatus>,
    native: Arc<dyn NativeCommandList>,
}

impl CommandListHandle {
    pub(crate) fn new(list: CommandList) -> Self {
        let status = Arc::clone(list.status());
        let native = Arc::clone(list.native());
        Self {
            list: Arc::new(Mutex::new(list)),
            status,
            native,
        }
    }

    /// 锁定命令列表进行记录
    pub fn lock(&self) -> MutexGuard<'_, CommandList> {
        self.list.lock()
    }

    pub fn status(&self) -> &Arc<ListStatus> {
        &self.status
    }

    pub fn native(&self) -> &Arc<dyn NativeCommandList> {
        &self.native
    }

    pub fn queue_type(&self) -> QueueType {
        self.status.queue_type()
    }

    pub fn state(&self) -> ListState {
        self.status.state()
    }

    pub fn fence_value(&self) -> u64 {
        self.status.fence_value()
    }

    /// 是否指向同一个命令列表
    pub fn ptr_eq(&self, other: &CommandListHandle) -> bool {
        Arc::ptr_eq(&self.list, &other.list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BarrierBatching;
    use crate::gfx::software::SoftwareCommandList;
    use crate::gfx::types::{HeapType, ResourceDesc, ALL_SUBRESOURCES};
    use crate::gfx::{NativeDevice, SoftwareDevice};
    use std::sync::Weak;

    struct Fixture {
        device: SoftwareDevice,
        fences: Arc<FenceSet>,
    }

    impl Fixture {
        fn new() -> Self {
            let device = SoftwareDevice::new();
            let fences = Arc::new(FenceSet::new(&device).unwrap());
            Self { device, fences }
        }

        fn list(&self, queue: QueueType, config: &SchedulerConfig) -> CommandList {
            let native = self.device.create_command_list(queue).unwrap();
            let mut list = CommandList::new(native, Arc::clone(&self.fences), config);
            let fence = self.fences.allocate_next_value(queue);
            list.register(fence);
            list
        }

        fn buffer(&self, state: ResourceStates) -> Resource {
            let desc = ResourceDesc::buffer(1024, HeapType::Default);
            let native = self.device.create_committed_resource(&desc, state).unwrap();
            Resource::new(native, state, false, Weak::new())
        }
    }

    fn recorded(list: &CommandList) -> Vec<GpuCommand> {
        list.native()
            .as_any()
            .downcast_ref::<SoftwareCommandList>()
            .unwrap()
            .commands()
    }

    #[test]
    fn test_register_and_close() {
        let fixture = Fixture::new();
        let mut list = fixture.list(QueueType::Graphics, &SchedulerConfig::default());
        assert_eq!(list.state(), ListState::Started);
        assert_eq!(list.fence_value(), 1);
        assert!(!list.is_utilized());

        list.draw(3, 1);
        assert!(list.is_utilized());
        list.close().unwrap();
        assert_eq!(list.state(), ListState::Completed);
    }

    #[test]
    fn test_barriers_flushed_before_draw() {
        let fixture = Fixture::new();
        let mut list = fixture.list(QueueType::Graphics, &SchedulerConfig::default());
        let texture = fixture.buffer(ResourceStates::COMMON);

        list.prepare_copy_dest_usage(&texture);
        assert_eq!(list.pending_barrier_count(), 1);
        assert!(recorded(&list).is_empty());

        list.draw(3, 1);
        assert_eq!(list.pending_barrier_count(), 0);
        let commands = recorded(&list);
        assert_eq!(commands.len(), 2);
        assert!(commands[0].is_barriers());
        assert_eq!(commands[1], GpuCommand::Draw { vertex_count: 3, instance_count: 1 });
    }

    #[test]
    fn test_barriers_flushed_on_close() {
        let fixture = Fixture::new();
        let mut list = fixture.list(QueueType::Graphics, &SchedulerConfig::default());
        let texture = fixture.buffer(ResourceStates::COMMON);

        list.prepare_copy_source_usage(&texture);
        list.close().unwrap();
        assert_eq!(
            recorded(&list),
            vec![GpuCommand::Barriers(vec![ResourceBarrier::transition(
                texture.handle(),
                ALL_SUBRESOURCES,
                ResourceStates::COMMON,
                ResourceStates::COPY_SOURCE,
            )])]
        );
    }

    #[test]
    fn test_unbatched_barriers_recorded_immediately() {
        let fixture = Fixture::new();
        let mut config = SchedulerConfig::default();
        config.barrier_batching = BarrierBatching::Off;
        let mut list = fixture.list(QueueType::Graphics, &config);
        let texture = fixture.buffer(ResourceStates::COMMON);

        list.prepare_copy_dest_usage(&texture);
        assert_eq!(recorded(&list).len(), 1);
        assert_eq!(list.stats().barriers, 1);
    }

    #[test]
    fn test_read_depends_on_prior_write() {
        let fixture = Fixture::new();
        let config = SchedulerConfig::default();
        let buffer = fixture.buffer(ResourceStates::COMMON);

        let mut writer = fixture.list(QueueType::Graphics, &config);
        writer.track_resource_usage(&buffer, AccessKind::Write);
        assert_eq!(buffer.fence_values(AccessKind::Write)[QueueType::Graphics], writer.fence_value());
        assert_eq!(buffer.fence_values(AccessKind::Any)[QueueType::Graphics], writer.fence_value());

        let mut reader = fixture.list(QueueType::Compute, &config);
        reader.track_resource_usage(&buffer, AccessKind::Read);
        assert_eq!(reader.dependencies()[AccessKind::Write][QueueType::Graphics], writer.fence_value());
        assert_eq!(buffer.fence_values(AccessKind::Read)[QueueType::Compute], reader.fence_value());
    }

    #[test]
    fn test_in_order_masks_own_queue() {
        let fixture = Fixture::new();
        let config = SchedulerConfig::default();
        let buffer = fixture.buffer(ResourceStates::COMMON);

        let mut first = fixture.list(QueueType::Graphics, &config);
        first.track_resource_usage(&buffer, AccessKind::Write);

        let mut second = fixture.list(QueueType::Graphics, &config);
        second.track_resource_usage(&buffer, AccessKind::Write);
        assert!(second.dependencies()[AccessKind::Any].is_zero());

        let mut out_of_order = config.clone();
        out_of_order.in_order_submission = false;
        let mut third = fixture.list(QueueType::Graphics, &out_of_order);
        third.track_resource_usage(&buffer, AccessKind::Write);
        assert_eq!(third.dependencies()[AccessKind::Any][QueueType::Graphics], second.fence_value());
    }

    #[test]
    fn test_copy_records_transitions_and_copy() {
        let fixture = Fixture::new();
        let mut list = fixture.list(QueueType::Copy, &SchedulerConfig::default());
        let src = fixture.buffer(ResourceStates::COMMON);
        let dst = fixture.buffer(ResourceStates::COMMON);

        list.copy_resource(&dst, &src);
        assert_eq!(dst.current_state(), ResourceStates::COPY_DEST);
        assert_eq!(src.current_state(), ResourceStates::COPY_SOURCE);

        let commands = recorded(&list);
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            GpuCommand::Barriers(barriers) => assert_eq!(barriers.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
