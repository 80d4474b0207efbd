//! GPU 同步机制模块
//!
//! 每个硬件队列类别一条单调递增的围栏计数，在四个检查点上跟踪：
//!
//! - `current`：已分配给命令列表的最大值（注册时递增）
//! - `submitted`：已交给异步提交队列的最大值
//! - `signalled`：提交线程已向硬件队列插入信号的最大值
//! - `completed`：GPU 已确认完成的最大值（缓存）
//!
//! 对每个队列始终有 `completed ≤ signalled ≤ submitted ≤ current`。
//! 围栏值 0 表示“不存在的工作”，对所有等待者都视为已完成。

use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

use crate::core::error::Result;
use crate::gfx::backend::{NativeDevice, NativeFence};
use crate::gfx::types::QueueType;

/// 每个队列类别一个围栏值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FenceValues(pub [u64; QueueType::COUNT]);

impl FenceValues {
    pub fn new(graphics: u64, compute: u64, copy: u64) -> Self {
        Self([graphics, compute, copy])
    }

    /// 逐项取最大值
    pub fn max(self, other: FenceValues) -> FenceValues {
        let mut result = self;
        for queue in QueueType::ALL {
            result[queue] = result[queue].max(other[queue]);
        }
        result
    }

    /// 逐项都不超过 `limit`
    pub fn all_le(&self, limit: &FenceValues) -> bool {
        QueueType::ALL.iter().all(|&q| self[q] <= limit[q])
    }

    /// 所有值都为 0
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0)
    }

    /// 将指定队列的值屏蔽为 0
    pub fn masked(mut self, queue: QueueType) -> FenceValues {
        self[queue] = 0;
        self
    }
}

impl Index<QueueType> for FenceValues {
    type Output = u64;

    fn index(&self, queue: QueueType) -> &u64 {
        &self.0[queue.index()]
    }
}

impl IndexMut<QueueType> for FenceValues {
    fn index_mut(&mut self, queue: QueueType) -> &mut u64 {
        &mut self.0[queue.index()]
    }
}

/// 访问类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// 读访问
    Read = 0,
    /// 写访问
    Write = 1,
    /// 任意访问（读或写中较严格者）
    Any = 2,
}

impl AccessKind {
    pub const ALL: [AccessKind; 3] = [AccessKind::Read, AccessKind::Write, AccessKind::Any];
}

/// [读, 写, 任意] × [图形, 计算, 复制] 的围栏值表
///
/// 命令列表用它累积自身的依赖，资源用它记录最后一次各类访问所属的围栏。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DependencySet([FenceValues; 3]);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把 `values` 并入 `kind` 行
    pub fn accumulate(&mut self, kind: AccessKind, values: FenceValues) {
        self[kind] = self[kind].max(values);
    }

    /// 读、写、任意三行的逐项最大值
    pub fn strictest(&self) -> FenceValues {
        self[AccessKind::Read]
            .max(self[AccessKind::Write])
            .max(self[AccessKind::Any])
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl Index<AccessKind> for DependencySet {
    type Output = FenceValues;

    fn index(&self, kind: AccessKind) -> &FenceValues {
        &self.0[kind as usize]
    }
}

impl IndexMut<AccessKind> for DependencySet {
    fn index_mut(&mut self, kind: AccessKind) -> &mut FenceValues {
        &mut self.0[kind as usize]
    }
}

struct QueueFence {
    fence: Arc<dyn NativeFence>,
    current: AtomicU64,
    submitted: AtomicU64,
    signalled: AtomicU64,
    completed: AtomicU64,
}

/// 三个队列类别的围栏集合
///
/// 由调度器创建，所有命令列表池、异步提交队列和命令列表共享。
pub struct FenceSet {
    queues: [QueueFence; QueueType::COUNT],
}

fn advance(counter: &AtomicU64, value: u64, what: &str, queue: QueueType) {
    let previous = counter.fetch_max(value, Ordering::AcqRel);
    debug_assert!(
        value >= previous,
        "{} fence value of {} queue moved backwards ({} -> {})",
        what,
        queue,
        previous,
        value
    );
}

impl FenceSet {
    /// 为每个队列类别创建一个原生围栏
    pub fn new(device: &dyn NativeDevice) -> Result<Self> {
        let make = || -> Result<QueueFence> {
            Ok(QueueFence {
                fence: device.create_fence(0)?,
                current: AtomicU64::new(0),
                submitted: AtomicU64::new(0),
                signalled: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            })
        };

        Ok(Self {
            queues: [make()?, make()?, make()?],
        })
    }

    fn queue(&self, queue: QueueType) -> &QueueFence {
        &self.queues[queue.index()]
    }

    /// 原生围栏对象
    pub fn native_fence(&self, queue: QueueType) -> &Arc<dyn NativeFence> {
        &self.queue(queue).fence
    }

    pub fn current_value(&self, queue: QueueType) -> u64 {
        self.queue(queue).current.load(Ordering::Acquire)
    }

    pub fn submitted_value(&self, queue: QueueType) -> u64 {
        self.queue(queue).submitted.load(Ordering::Acquire)
    }

    pub fn signalled_value(&self, queue: QueueType) -> u64 {
        self.queue(queue).signalled.load(Ordering::Acquire)
    }

    /// 缓存的已完成值，不查询原生围栏
    pub fn last_completed_value(&self, queue: QueueType) -> u64 {
        self.queue(queue).completed.load(Ordering::Acquire)
    }

    pub fn current_values(&self) -> FenceValues {
        self.collect(|q| self.current_value(q))
    }

    pub fn submitted_values(&self) -> FenceValues {
        self.collect(|q| self.submitted_value(q))
    }

    pub fn signalled_values(&self) -> FenceValues {
        self.collect(|q| self.signalled_value(q))
    }

    pub fn last_completed_values(&self) -> FenceValues {
        self.collect(|q| self.last_completed_value(q))
    }

    /// 查询原生围栏后的已完成值
    pub fn completed_values(&self) -> FenceValues {
        self.collect(|q| self.advance_completion(q))
    }

    fn collect(&self, f: impl Fn(QueueType) -> u64) -> FenceValues {
        let mut values = FenceValues::default();
        for queue in QueueType::ALL {
            values[queue] = f(queue);
        }
        values
    }

    /// 前移 `current`（只能前进）
    pub fn set_current_value(&self, queue: QueueType, value: u64) {
        advance(&self.queue(queue).current, value, "current", queue);
    }

    /// 为新注册的命令列表分配下一个围栏值
    pub fn allocate_next_value(&self, queue: QueueType) -> u64 {
        self.queue(queue).current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 回退空命令列表占用的围栏值
    ///
    /// 只有当 `value` 仍是该队列最新分配的值时才会成功。
    pub fn rewind_current_value(&self, queue: QueueType, value: u64) -> bool {
        if value == 0 {
            return false;
        }
        self.queue(queue)
            .current
            .compare_exchange(value, value - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 前移 `submitted`（只能前进）
    pub fn set_submitted_value(&self, queue: QueueType, value: u64) {
        debug_assert!(
            value <= self.current_value(queue),
            "submitting {} fence {} beyond current {}",
            queue,
            value,
            self.current_value(queue)
        );
        advance(&self.queue(queue).submitted, value, "submitted", queue);
    }

    /// 前移 `signalled`（只能前进）
    pub fn set_signalled_value(&self, queue: QueueType, value: u64) {
        advance(&self.queue(queue).signalled, value, "signalled", queue);
    }

    /// 查询原生围栏并更新缓存的已完成值
    pub fn advance_completion(&self, queue: QueueType) -> u64 {
        let entry = self.queue(queue);
        let observed = entry.fence.completed_value();
        let previous = entry.completed.fetch_max(observed, Ordering::AcqRel);
        previous.max(observed)
    }

    /// 围栏值是否已完成
    ///
    /// 先比较缓存值，只有缓存过期时才查询原生围栏。
    pub fn is_completed(&self, value: u64, queue: QueueType) -> bool {
        if value == 0 || value <= self.last_completed_value(queue) {
            return true;
        }
        value <= self.advance_completion(queue)
    }

    /// 三个队列上的值是否都已完成
    pub fn are_completed(&self, values: &FenceValues) -> bool {
        QueueType::ALL.iter().all(|&q| self.is_completed(values[q], q))
    }

    /// 在 CPU 上阻塞，直到指定队列的围栏到达 `value`
    ///
    /// 等待一个从未提交过的值必然死锁，这种调用会被断言并直接返回。
    pub fn wait_for_fence(&self, value: u64, queue: QueueType) {
        if self.is_completed(value, queue) {
            return;
        }

        let submitted = self.submitted_value(queue);
        if value > submitted {
            error!(
                queue = %queue,
                value,
                submitted,
                "Waiting on a fence value that was never submitted"
            );
            debug_assert!(false, "CPU wait on unsubmitted {} fence {}", queue, value);
            return;
        }

        trace!(queue = %queue, value, "CPU wait for fence");
        self.queue(queue).fence.wait_on_cpu(value);
        self.advance_completion(queue);
    }

    /// 在 CPU 上等待三个队列的值全部完成
    pub fn wait_for_fences(&self, values: &FenceValues) {
        for queue in QueueType::ALL {
            self.wait_for_fence(values[queue], queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::SoftwareDevice;

    fn fence_set() -> FenceSet {
        FenceSet::new(&SoftwareDevice::new()).unwrap()
    }

    fn assert_ordered(fences: &FenceSet) {
        for queue in QueueType::ALL {
            let completed = fences.last_completed_value(queue);
            assert!(completed <= fences.signalled_value(queue));
            assert!(fences.signalled_value(queue) <= fences.submitted_value(queue));
            assert!(fences.submitted_value(queue) <= fences.current_value(queue));
        }
    }

    #[test]
    fn test_fence_values_ops() {
        let a = FenceValues::new(3, 9, 1);
        let b = FenceValues::new(5, 2, 1);
        assert_eq!(a.max(b), FenceValues::new(5, 9, 1));
        assert!(FenceValues::new(1, 2, 1).all_le(&a));
        assert!(!b.all_le(&a));
        assert_eq!(a.masked(QueueType::Compute), FenceValues::new(3, 0, 1));
        assert!(FenceValues::default().is_zero());
    }

    #[test]
    fn test_dependency_strictest() {
        let mut deps = DependencySet::new();
        deps.accumulate(AccessKind::Read, FenceValues::new(4, 0, 0));
        deps.accumulate(AccessKind::Write, FenceValues::new(2, 7, 0));
        deps.accumulate(AccessKind::Read, FenceValues::new(1, 0, 3));
        assert_eq!(deps[AccessKind::Read], FenceValues::new(4, 0, 3));
        assert_eq!(deps.strictest(), FenceValues::new(4, 7, 3));
    }

    #[test]
    fn test_allocation_is_monotonic() {
        let fences = fence_set();
        let first = fences.allocate_next_value(QueueType::Graphics);
        let second = fences.allocate_next_value(QueueType::Graphics);
        assert!(second > first);
        assert_eq!(fences.current_value(QueueType::Graphics), second);
        assert_eq!(fences.current_value(QueueType::Compute), 0);
    }

    #[test]
    fn test_rewind_only_latest() {
        let fences = fence_set();
        let a = fences.allocate_next_value(QueueType::Copy);
        let b = fences.allocate_next_value(QueueType::Copy);

        assert!(!fences.rewind_current_value(QueueType::Copy, a));
        assert!(fences.rewind_current_value(QueueType::Copy, b));
        assert_eq!(fences.current_value(QueueType::Copy), a);
        assert!(!fences.rewind_current_value(QueueType::Copy, 0));
    }

    #[test]
    fn test_zero_is_always_completed() {
        let fences = fence_set();
        assert!(fences.is_completed(0, QueueType::Graphics));
        assert!(fences.are_completed(&FenceValues::default()));
        // 值 0 的等待立即返回
        fences.wait_for_fence(0, QueueType::Compute);
    }

    #[test]
    fn test_completion_follows_native_fence() {
        let fences = fence_set();
        let value = fences.allocate_next_value(QueueType::Graphics);
        fences.set_submitted_value(QueueType::Graphics, value);
        fences.set_signalled_value(QueueType::Graphics, value);
        assert!(!fences.is_completed(value, QueueType::Graphics));
        assert_ordered(&fences);

        fences.native_fence(QueueType::Graphics).signal(value);
        assert!(fences.is_completed(value, QueueType::Graphics));
        assert_eq!(fences.last_completed_value(QueueType::Graphics), value);
        assert_ordered(&fences);

        fences.wait_for_fences(&FenceValues::new(value, 0, 0));
    }
}
