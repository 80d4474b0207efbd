//! GPU 资源的状态与生命周期跟踪
//!
//! 每个资源记录：
//!
//! - 当前状态与已宣告（拆分屏障进行中）的状态
//! - 可切换的子资源级状态：先以整体模式跟踪，首次按子集访问时展开为逐子资源状态，
//!   之后再按整体访问时收回
//! - [读, 写, 任意] × 队列 的最后访问围栏，用于计算命令列表的跨队列依赖
//!
//! 最后一个引用释放时资源进入释放堆，而不是立即销毁。

use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

use super::heap::ResourceHeaps;
use crate::gfx::backend::NativeResource;
use crate::gfx::types::{
    QueueType, ResourceBarrier, ResourceDesc, ResourceFlags, ResourceHandle, ResourceStates, ShapeHash,
    ALL_SUBRESOURCES,
};
use crate::renderer::commands::command::CommandList;
use crate::renderer::commands::sync::{AccessKind, DependencySet, FenceSet, FenceValues};

/// 资源的子资源视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceView {
    pub first_mip: u32,
    pub mip_count: u32,
    pub first_slice: u32,
    pub slice_count: u32,
}

impl ResourceView {
    /// 一直延伸到末尾
    pub const REMAINING: u32 = u32::MAX;

    /// 整个资源
    pub fn whole() -> Self {
        Self {
            first_mip: 0,
            mip_count: Self::REMAINING,
            first_slice: 0,
            slice_count: Self::REMAINING,
        }
    }

    /// 所有数组层上的一段 mip
    pub fn mips(first_mip: u32, mip_count: u32) -> Self {
        Self {
            first_mip,
            mip_count,
            ..Self::whole()
        }
    }

    /// 所有 mip 上的一段数组层
    pub fn slices(first_slice: u32, slice_count: u32) -> Self {
        Self {
            first_slice,
            slice_count,
            ..Self::whole()
        }
    }

    /// 单个子资源
    pub fn subresource(mip: u32, slice: u32) -> Self {
        Self {
            first_mip: mip,
            mip_count: 1,
            first_slice: slice,
            slice_count: 1,
        }
    }

    fn clamp(first: u32, count: u32, total: u32) -> Range<u32> {
        let start = first.min(total);
        let end = if count == Self::REMAINING {
            total
        } else {
            start.saturating_add(count).min(total)
        };
        start..end
    }

    fn ranges(&self, desc: &ResourceDesc) -> (Range<u32>, Range<u32>) {
        let mips = Self::clamp(self.first_mip, self.mip_count, desc.mip_levels.max(1) as u32);
        let slices = Self::clamp(self.first_slice, self.slice_count, desc.array_size());
        (mips, slices)
    }

    /// 视图是否覆盖全部子资源
    pub fn covers_all(&self, desc: &ResourceDesc) -> bool {
        if desc.subresource_count() == 1 {
            return true;
        }
        let (mips, slices) = self.ranges(desc);
        mips == (0..desc.mip_levels.max(1) as u32) && slices == (0..desc.array_size())
    }

    /// 视图覆盖的子资源下标
    pub fn subresources(&self, desc: &ResourceDesc) -> Vec<u32> {
        let (mips, slices) = self.ranges(desc);
        slices
            .flat_map(|slice| mips.clone().map(move |mip| desc.subresource_index(mip, slice)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatePair {
    current: ResourceStates,
    announced: Option<ResourceStates>,
}

impl StatePair {
    fn new(current: ResourceStates) -> Self {
        Self { current, announced: None }
    }

    /// 补齐未结束的拆分屏障，返回是否补齐过
    fn complete_announced(&mut self, handle: ResourceHandle, subresource: u32, out: &mut Vec<ResourceBarrier>) -> bool {
        match self.announced.take() {
            Some(announced) => {
                out.push(ResourceBarrier::end_only(handle, subresource, self.current, announced));
                self.current = announced;
                true
            }
            None => false,
        }
    }

    /// 当前状态不满足时转换
    fn transition(&mut self, handle: ResourceHandle, subresource: u32, desired: ResourceStates, out: &mut Vec<ResourceBarrier>) {
        if !self.current.satisfies(desired) {
            out.push(ResourceBarrier::transition(handle, subresource, self.current, desired));
            self.current = desired;
        }
    }

    /// 精确转换到 `desired`
    fn transition_exact(&mut self, handle: ResourceHandle, subresource: u32, desired: ResourceStates, out: &mut Vec<ResourceBarrier>) {
        if self.current != desired {
            out.push(ResourceBarrier::transition(handle, subresource, self.current, desired));
            self.current = desired;
        }
    }

    fn begin(
        &mut self,
        handle: ResourceHandle,
        subresource: u32,
        desired: ResourceStates,
        out: &mut Vec<ResourceBarrier>,
    ) -> Option<&'static str> {
        let mut repair = None;
        match self.announced {
            Some(announced) if announced == desired => return None,
            Some(_) => {
                self.complete_announced(handle, subresource, out);
                repair = Some("conflicting begin of a split barrier");
            }
            None => {}
        }

        if !self.current.satisfies(desired) {
            out.push(ResourceBarrier::begin_only(handle, subresource, self.current, desired));
            self.announced = Some(desired);
        }
        repair
    }

    fn end(
        &mut self,
        handle: ResourceHandle,
        subresource: u32,
        desired: ResourceStates,
        out: &mut Vec<ResourceBarrier>,
    ) -> Option<&'static str> {
        match self.announced {
            Some(announced) if announced == desired => {
                self.complete_announced(handle, subresource, out);
                None
            }
            Some(_) => {
                // 先按宣告的状态结束，再转换到请求的状态
                self.complete_announced(handle, subresource, out);
                self.transition(handle, subresource, desired, out);
                Some("end of a split barrier does not match its begin")
            }
            None => {
                let before = out.len();
                self.transition(handle, subresource, desired, out);
                (out.len() != before).then_some("end of a split barrier without a begin")
            }
        }
    }
}

struct Tracking {
    shared: StatePair,
    subresources: Option<Vec<StatePair>>,
    fences: DependencySet,
}

impl Tracking {
    /// 所有子资源处于同一状态且没有进行中的拆分屏障时返回该状态
    fn uniform_state(&self) -> Option<ResourceStates> {
        match &self.subresources {
            None => self.shared.announced.is_none().then_some(self.shared.current),
            Some(subs) => {
                let first = subs.first()?;
                subs.iter()
                    .all(|s| s.announced.is_none() && s.current == first.current)
                    .then_some(first.current)
            }
        }
    }
}

/// 受跟踪的 GPU 资源
pub struct Resource {
    native: Arc<dyn NativeResource>,
    desc: ResourceDesc,
    handle: ResourceHandle,
    shape_hash: ShapeHash,
    reusable: bool,
    heaps: Weak<ResourceHeaps>,
    tracking: Mutex<Tracking>,
    repairs: AtomicU32,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("handle", &self.handle)
            .field("dimension", &self.desc.dimension)
            .field("reusable", &self.reusable)
            .finish()
    }
}

impl Resource {
    /// 包装原生资源对象
    ///
    /// `heaps` 为空时资源释放后直接销毁，不经过释放堆。
    pub fn new(
        native: Arc<dyn NativeResource>,
        initial_state: ResourceStates,
        reusable: bool,
        heaps: Weak<ResourceHeaps>,
    ) -> Self {
        let desc = *native.desc();
        Self {
            handle: native.handle(),
            shape_hash: desc.shape_hash(),
            desc,
            native,
            reusable,
            heaps,
            tracking: Mutex::new(Tracking {
                shared: StatePair::new(initial_state),
                subresources: None,
                fences: DependencySet::new(),
            }),
            repairs: AtomicU32::new(0),
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn native(&self) -> &Arc<dyn NativeResource> {
        &self.native
    }

    pub fn shape_hash(&self) -> ShapeHash {
        self.shape_hash
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// 是否允许多个队列同时写入（不需要 UAV 屏障）
    pub fn is_concurrent(&self) -> bool {
        self.desc.flags.contains(ResourceFlags::ALLOW_SIMULTANEOUS_ACCESS)
    }

    /// 整体模式下的当前状态；逐子资源模式下为第 0 个子资源的状态
    pub fn current_state(&self) -> ResourceStates {
        self.subresource_state(0)
    }

    /// 子资源的当前状态
    pub fn subresource_state(&self, subresource: u32) -> ResourceStates {
        let tracking = self.tracking.lock();
        match &tracking.subresources {
            Some(subs) => subs
                .get(subresource as usize)
                .map_or(tracking.shared.current, |s| s.current),
            None => tracking.shared.current,
        }
    }

    /// 整体模式下进行中的拆分屏障目标状态
    pub fn announced_state(&self) -> Option<ResourceStates> {
        self.tracking.lock().shared.announced
    }

    /// 是否处于逐子资源跟踪模式
    pub fn is_per_subresource(&self) -> bool {
        self.tracking.lock().subresources.is_some()
    }

    /// 检测并修复过的屏障不一致次数
    pub fn repair_count(&self) -> u32 {
        self.repairs.load(Ordering::Relaxed)
    }

    fn note_repair(&self, reason: &str) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
        warn!(resource = %self.handle, "Barrier inconsistency repaired: {}", reason);
    }

    fn submit_barriers(&self, list: &mut CommandList, barriers: Vec<ResourceBarrier>) -> bool {
        if barriers.is_empty() {
            return false;
        }
        trace!(resource = %self.handle, count = barriers.len(), "Resource barriers");
        list.resource_barrier(&barriers);
        true
    }

    // ------------------------------------------------------------------
    // 状态转换
    // ------------------------------------------------------------------

    /// 是否需要转换屏障才能进入 `desired`
    pub fn needs_transition_barrier(&self, desired: ResourceStates) -> bool {
        let tracking = self.tracking.lock();
        match &tracking.subresources {
            Some(subs) => subs.iter().any(|s| s.announced.is_some() || !s.current.satisfies(desired)),
            None => tracking.shared.announced.is_some() || !tracking.shared.current.satisfies(desired),
        }
    }

    /// 选择能够执行该转换的队列
    ///
    /// 复制和计算队列无法处理的状态需要交给图形队列。
    pub fn select_queue_for_transition_barrier(&self, queue: QueueType, desired: ResourceStates) -> QueueType {
        let tracking = self.tracking.lock();
        let mut states = desired | tracking.shared.current;
        if let Some(subs) = &tracking.subresources {
            for sub in subs {
                states |= sub.current;
            }
        }
        if queue.supports_states(states) {
            queue
        } else {
            QueueType::Graphics
        }
    }

    /// 整个资源转换到 `desired`，返回是否记录了屏障
    pub fn transition_barrier(&self, list: &mut CommandList, desired: ResourceStates) -> bool {
        self.transition_barrier_view(list, &ResourceView::whole(), desired)
    }

    /// 视图覆盖的子资源转换到 `desired`
    pub fn transition_barrier_view(&self, list: &mut CommandList, view: &ResourceView, desired: ResourceStates) -> bool {
        let mut barriers = Vec::new();
        let mut repairs = Vec::new();
        {
            let mut tracking = self.tracking.lock();
            let whole = view.covers_all(&self.desc);

            if desired == ResourceStates::UNORDERED_ACCESS && !self.is_concurrent() {
                let in_uav = match &tracking.subresources {
                    Some(subs) => view
                        .subresources(&self.desc)
                        .iter()
                        .any(|&i| subs.get(i as usize).map_or(false, |s| s.current == desired)),
                    None => tracking.shared.current == desired,
                };
                if in_uav {
                    barriers.push(ResourceBarrier::uav(self.handle));
                }
            }

            if whole {
                self.transition_all(&mut tracking, desired, &mut barriers, &mut repairs);
            } else {
                let shared = tracking.shared;
                let count = self.desc.subresource_count() as usize;
                let subs = tracking.subresources.get_or_insert_with(|| vec![shared; count]);
                for index in view.subresources(&self.desc) {
                    let sub = &mut subs[index as usize];
                    if sub.complete_announced(self.handle, index, &mut barriers) {
                        repairs.push("transition while a split barrier is pending");
                    }
                    sub.transition(self.handle, index, desired, &mut barriers);
                }
            }
        }

        for reason in repairs {
            self.note_repair(reason);
        }
        self.submit_barriers(list, barriers)
    }

    /// 整体转换；逐子资源模式下逐个转换到共同状态并收回整体模式
    fn transition_all(
        &self,
        tracking: &mut Tracking,
        desired: ResourceStates,
        barriers: &mut Vec<ResourceBarrier>,
        repairs: &mut Vec<&'static str>,
    ) {
        match tracking.subresources.take() {
            Some(mut subs) => {
                for (index, sub) in subs.iter_mut().enumerate() {
                    if sub.complete_announced(self.handle, index as u32, barriers) {
                        repairs.push("transition while a split barrier is pending");
                    }
                    sub.transition_exact(self.handle, index as u32, desired, barriers);
                }
                tracking.shared = StatePair::new(desired);
            }
            None => {
                if tracking.shared.complete_announced(self.handle, ALL_SUBRESOURCES, barriers) {
                    repairs.push("transition while a split barrier is pending");
                }
                tracking.shared.transition(self.handle, ALL_SUBRESOURCES, desired, barriers);
            }
        }
    }

    /// 开始一个整体的拆分屏障
    pub fn begin_transition_barrier(&self, list: &mut CommandList, desired: ResourceStates) -> bool {
        self.begin_transition_barrier_view(list, &ResourceView::whole(), desired)
    }

    /// 开始视图上的拆分屏障
    pub fn begin_transition_barrier_view(&self, list: &mut CommandList, view: &ResourceView, desired: ResourceStates) -> bool {
        let mut barriers = Vec::new();
        let mut repairs = Vec::new();
        {
            let mut tracking = self.tracking.lock();
            if view.covers_all(&self.desc) {
                if tracking.subresources.is_some() {
                    // 逐子资源状态无法整体拆分，直接完成转换
                    self.transition_all(&mut tracking, desired, &mut barriers, &mut repairs);
                } else {
                    repairs.extend(tracking.shared.begin(self.handle, ALL_SUBRESOURCES, desired, &mut barriers));
                }
            } else {
                let shared = tracking.shared;
                let count = self.desc.subresource_count() as usize;
                let subs = tracking.subresources.get_or_insert_with(|| vec![shared; count]);
                for index in view.subresources(&self.desc) {
                    repairs.extend(subs[index as usize].begin(self.handle, index, desired, &mut barriers));
                }
            }
        }

        for reason in repairs {
            self.note_repair(reason);
        }
        self.submit_barriers(list, barriers)
    }

    /// 结束一个整体的拆分屏障
    pub fn end_transition_barrier(&self, list: &mut CommandList, desired: ResourceStates) -> bool {
        self.end_transition_barrier_view(list, &ResourceView::whole(), desired)
    }

    /// 结束视图上的拆分屏障
    pub fn end_transition_barrier_view(&self, list: &mut CommandList, view: &ResourceView, desired: ResourceStates) -> bool {
        let mut barriers = Vec::new();
        let mut repairs = Vec::new();
        {
            let mut tracking = self.tracking.lock();
            if view.covers_all(&self.desc) {
                match tracking.subresources.take() {
                    Some(mut subs) => {
                        for (index, sub) in subs.iter_mut().enumerate() {
                            repairs.extend(sub.end(self.handle, index as u32, desired, &mut barriers));
                            sub.transition_exact(self.handle, index as u32, desired, &mut barriers);
                        }
                        tracking.shared = StatePair::new(desired);
                    }
                    None => {
                        repairs.extend(tracking.shared.end(self.handle, ALL_SUBRESOURCES, desired, &mut barriers));
                    }
                }
            } else {
                let shared = tracking.shared;
                let count = self.desc.subresource_count() as usize;
                let subs = tracking.subresources.get_or_insert_with(|| vec![shared; count]);
                for index in view.subresources(&self.desc) {
                    repairs.extend(subs[index as usize].end(self.handle, index, desired, &mut barriers));
                }
            }
        }

        for reason in repairs {
            self.note_repair(reason);
        }
        self.submit_barriers(list, barriers)
    }

    // ------------------------------------------------------------------
    // 围栏
    // ------------------------------------------------------------------

    /// 某类访问最后一次发生时各队列的围栏值
    pub fn fence_values(&self, kind: AccessKind) -> FenceValues {
        self.tracking.lock().fences[kind]
    }

    pub fn fence_value(&self, kind: AccessKind, queue: QueueType) -> u64 {
        self.fence_values(kind)[queue]
    }

    /// 记录一次访问，同时更新“任意”行
    pub fn set_fence_value(&self, kind: AccessKind, queue: QueueType, value: u64) {
        let mut tracking = self.tracking.lock();
        let row = &mut tracking.fences[kind][queue];
        *row = (*row).max(value);
        let any = &mut tracking.fences[AccessKind::Any][queue];
        *any = (*any).max(value);
    }

    /// GPU 是否仍可能在使用该资源
    pub fn is_used(&self, fences: &FenceSet) -> bool {
        !fences.are_completed(&self.fence_values(AccessKind::Any))
    }

    /// 在 CPU 上等待 GPU 不再使用该资源
    pub fn wait_for_unused(&self, fences: &FenceSet) {
        fences.wait_for_fences(&self.fence_values(AccessKind::Any));
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        let tracking = self.tracking.get_mut();
        let fences = tracking.fences.strictest();
        let recyclable_state = if self.reusable { tracking.uniform_state() } else { None };

        match self.heaps.upgrade() {
            Some(heaps) => heaps.release_later(Arc::clone(&self.native), recyclable_state, fences),
            None => trace!(resource = %self.handle, "Resource dropped without release heap"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BarrierBatching, SchedulerConfig};
    use crate::gfx::software::SoftwareCommandList;
    use crate::gfx::types::{BarrierSplit, Format, GpuCommand, HeapType};
    use crate::gfx::{NativeDevice, SoftwareDevice};

    struct Fixture {
        device: Arc<SoftwareDevice>,
        list: CommandList,
    }

    impl Fixture {
        fn new() -> Self {
            let device = Arc::new(SoftwareDevice::new());
            let fences = Arc::new(FenceSet::new(device.as_ref()).unwrap());
            let mut config = SchedulerConfig::default();
            config.barrier_batching = BarrierBatching::Off;

            let native = device.create_command_list(QueueType::Graphics).unwrap();
            let mut list = CommandList::new(native, Arc::clone(&fences), &config);
            list.register(fences.allocate_next_value(QueueType::Graphics));
            Self { device, list }
        }

        fn resource(&self, desc: ResourceDesc, state: ResourceStates) -> Resource {
            let native = self.device.create_committed_resource(&desc, state).unwrap();
            Resource::new(native, state, false, Weak::new())
        }

        fn barriers(&self) -> Vec<ResourceBarrier> {
            self.list
                .native()
                .as_any()
                .downcast_ref::<SoftwareCommandList>()
                .unwrap()
                .commands()
                .into_iter()
                .flat_map(|command| match command {
                    GpuCommand::Barriers(barriers) => barriers,
                    _ => Vec::new(),
                })
                .collect()
        }
    }

    fn texture() -> ResourceDesc {
        ResourceDesc::texture_2d(64, 64, Format::R8G8B8A8Unorm, 4, 1)
    }

    #[test]
    fn test_transition_is_idempotent() {
        let mut f = Fixture::new();
        let buffer = f.resource(ResourceDesc::buffer(64, HeapType::Default), ResourceStates::COMMON);

        assert!(buffer.transition_barrier(&mut f.list, ResourceStates::COPY_DEST));
        assert!(!buffer.transition_barrier(&mut f.list, ResourceStates::COPY_DEST));
        assert_eq!(f.barriers().len(), 1);
        assert_eq!(buffer.current_state(), ResourceStates::COPY_DEST);
    }

    #[test]
    fn test_compatible_read_state_is_noop() {
        let mut f = Fixture::new();
        let buffer = f.resource(ResourceDesc::buffer(64, HeapType::Upload), ResourceStates::GENERIC_READ);
        assert!(!buffer.needs_transition_barrier(ResourceStates::COPY_SOURCE));
        assert!(!buffer.transition_barrier(&mut f.list, ResourceStates::COPY_SOURCE));
        assert_eq!(buffer.current_state(), ResourceStates::GENERIC_READ);
    }

    #[test]
    fn test_split_barrier_pair() {
        let mut f = Fixture::new();
        let tex = f.resource(texture(), ResourceStates::RENDER_TARGET);

        tex.begin_transition_barrier(&mut f.list, ResourceStates::PIXEL_SHADER_RESOURCE);
        assert_eq!(tex.announced_state(), Some(ResourceStates::PIXEL_SHADER_RESOURCE));
        assert_eq!(tex.current_state(), ResourceStates::RENDER_TARGET);

        tex.end_transition_barrier(&mut f.list, ResourceStates::PIXEL_SHADER_RESOURCE);
        assert_eq!(tex.announced_state(), None);
        assert_eq!(tex.current_state(), ResourceStates::PIXEL_SHADER_RESOURCE);

        let splits: Vec<BarrierSplit> = f
            .barriers()
            .iter()
            .map(|b| match b {
                ResourceBarrier::Transition { split, .. } => *split,
                _ => BarrierSplit::None,
            })
            .collect();
        assert_eq!(splits, vec![BarrierSplit::BeginOnly, BarrierSplit::EndOnly]);
        assert_eq!(tex.repair_count(), 0);
    }

    #[test]
    fn test_mismatched_end_is_repaired() {
        let mut f = Fixture::new();
        let tex = f.resource(texture(), ResourceStates::COMMON);
        let handle = tex.handle();

        tex.begin_transition_barrier(&mut f.list, ResourceStates::COPY_SOURCE);
        tex.end_transition_barrier(&mut f.list, ResourceStates::UNORDERED_ACCESS);

        assert_eq!(
            f.barriers(),
            vec![
                ResourceBarrier::begin_only(handle, ALL_SUBRESOURCES, ResourceStates::COMMON, ResourceStates::COPY_SOURCE),
                ResourceBarrier::end_only(handle, ALL_SUBRESOURCES, ResourceStates::COMMON, ResourceStates::COPY_SOURCE),
                ResourceBarrier::transition(
                    handle,
                    ALL_SUBRESOURCES,
                    ResourceStates::COPY_SOURCE,
                    ResourceStates::UNORDERED_ACCESS
                ),
            ]
        );
        assert_eq!(tex.current_state(), ResourceStates::UNORDERED_ACCESS);
        assert_eq!(tex.repair_count(), 1);
    }

    #[test]
    fn test_transition_closes_pending_split() {
        let mut f = Fixture::new();
        let tex = f.resource(texture(), ResourceStates::COMMON);

        tex.begin_transition_barrier(&mut f.list, ResourceStates::COPY_DEST);
        tex.transition_barrier(&mut f.list, ResourceStates::COPY_SOURCE);

        assert_eq!(f.barriers().len(), 3);
        assert_eq!(tex.announced_state(), None);
        assert_eq!(tex.current_state(), ResourceStates::COPY_SOURCE);
        assert_eq!(tex.repair_count(), 1);
    }

    #[test]
    fn test_uav_to_uav_forces_uav_barrier() {
        let mut f = Fixture::new();
        let buffer = f.resource(
            ResourceDesc::buffer(256, HeapType::Default).with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS),
            ResourceStates::UNORDERED_ACCESS,
        );
        assert!(buffer.transition_barrier(&mut f.list, ResourceStates::UNORDERED_ACCESS));
        assert_eq!(f.barriers(), vec![ResourceBarrier::uav(buffer.handle())]);

        let concurrent = f.resource(
            ResourceDesc::buffer(256, HeapType::Default)
                .with_flags(ResourceFlags::ALLOW_UNORDERED_ACCESS | ResourceFlags::ALLOW_SIMULTANEOUS_ACCESS),
            ResourceStates::UNORDERED_ACCESS,
        );
        assert!(!concurrent.transition_barrier(&mut f.list, ResourceStates::UNORDERED_ACCESS));
    }

    #[test]
    fn test_subresource_promotion_and_demotion() {
        let mut f = Fixture::new();
        let tex = f.resource(texture(), ResourceStates::COMMON);

        tex.transition_barrier_view(&mut f.list, &ResourceView::mips(1, 1), ResourceStates::COPY_DEST);
        assert!(tex.is_per_subresource());
        assert_eq!(tex.subresource_state(1), ResourceStates::COPY_DEST);
        assert_eq!(tex.subresource_state(0), ResourceStates::COMMON);
        assert_eq!(
            f.barriers(),
            vec![ResourceBarrier::transition(tex.handle(), 1, ResourceStates::COMMON, ResourceStates::COPY_DEST)]
        );

        tex.transition_barrier(&mut f.list, ResourceStates::PIXEL_SHADER_RESOURCE);
        assert!(!tex.is_per_subresource());
        assert_eq!(tex.current_state(), ResourceStates::PIXEL_SHADER_RESOURCE);
        // 1 次展开 + 4 个子资源各 1 次收回
        assert_eq!(f.barriers().len(), 5);
    }

    #[test]
    fn test_demotion_skips_matching_subresources() {
        let mut f = Fixture::new();
        let tex = f.resource(texture(), ResourceStates::COMMON);

        tex.transition_barrier_view(&mut f.list, &ResourceView::mips(0, 2), ResourceStates::COPY_DEST);
        tex.transition_barrier(&mut f.list, ResourceStates::COPY_DEST);
        // 2 次展开 + 2 个仍为 COMMON 的子资源
        assert_eq!(f.barriers().len(), 4);
    }

    #[test]
    fn test_view_ranges() {
        let desc = ResourceDesc::texture_2d(64, 64, Format::R8G8B8A8Unorm, 3, 2);
        assert!(ResourceView::whole().covers_all(&desc));
        assert!(!ResourceView::mips(1, 2).covers_all(&desc));
        assert_eq!(ResourceView::slices(1, 1).subresources(&desc), vec![3, 4, 5]);
        assert_eq!(ResourceView::subresource(2, 1).subresources(&desc), vec![5]);
        assert!(ResourceView::subresource(0, 0).covers_all(&ResourceDesc::buffer(16, HeapType::Default)));
    }

    #[test]
    fn test_fence_bookkeeping() {
        let f = Fixture::new();
        let buffer = f.resource(ResourceDesc::buffer(64, HeapType::Default), ResourceStates::COMMON);
        buffer.set_fence_value(AccessKind::Write, QueueType::Graphics, 10);
        buffer.set_fence_value(AccessKind::Read, QueueType::Compute, 4);
        buffer.set_fence_value(AccessKind::Write, QueueType::Graphics, 7);

        assert_eq!(buffer.fence_value(AccessKind::Write, QueueType::Graphics), 10);
        assert_eq!(buffer.fence_values(AccessKind::Any), FenceValues::new(10, 4, 0));
        assert_eq!(buffer.fence_values(AccessKind::Read), FenceValues::new(0, 4, 0));
    }

    #[test]
    fn test_copy_queue_cannot_leave_graphics_state() {
        let f = Fixture::new();
        let tex = f.resource(texture(), ResourceStates::RENDER_TARGET);
        assert_eq!(
            tex.select_queue_for_transition_barrier(QueueType::Copy, ResourceStates::COPY_SOURCE),
            QueueType::Graphics
        );
        let buffer = f.resource(ResourceDesc::buffer(64, HeapType::Default), ResourceStates::COMMON);
        assert_eq!(
            buffer.select_queue_for_transition_barrier(QueueType::Copy, ResourceStates::COPY_DEST),
            QueueType::Copy
        );
    }

    #[test]
    fn test_drop_goes_through_release_heap() {
        let f = Fixture::new();
        let heaps = ResourceHeaps::new(f.device.clone());
        let desc = ResourceDesc::buffer(512, HeapType::Default);
        let created = heaps.create_or_reuse_committed_resource(&desc, ResourceStates::COMMON).unwrap();

        let buffer = Resource::new(created.object, created.state, true, Arc::downgrade(&heaps));
        buffer.set_fence_value(AccessKind::Write, QueueType::Graphics, 9);
        drop(buffer);

        assert_eq!(heaps.pending_release_count(), 1);
        assert_eq!(f.device.live_resource_count(), 1);

        heaps.flush_release_heap(&FenceValues::new(10, 10, 10), None);
        assert_eq!(heaps.recyclable_count(), 1);
    }
}
