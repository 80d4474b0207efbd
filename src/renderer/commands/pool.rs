//! 命令列表池
//!
//! 每个队列类别一个池，维护三条链表：
//!
//! - `live`：按注册顺序排列的已注册列表（录制中 / 已调度 / 已提交）
//! - `busy`：GPU 已完成、正在重置的列表
//! - `free`：可以复用的空闲列表
//!
//! 每次获取或交还列表时顺带执行一次调度维护。提交严格按注册顺序进行，
//! 因为围栏值单调递增，乱序提交会破坏 `submitted` 的单调性。

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use super::command::{CommandList, CommandListHandle, ListState};
use super::queue::AsyncCommandQueue;
use super::sync::FenceSet;
use crate::core::config::SchedulerConfig;
use crate::core::error::Result;
use crate::gfx::backend::NativeDevice;
use crate::gfx::types::QueueType;

/// 命令列表池的统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 新创建的列表数
    pub created: usize,
    /// 累计获取次数
    pub acquired: usize,
    /// 累计提交次数
    pub submitted: usize,
    /// 当前链表长度
    pub live: usize,
    pub busy: usize,
    pub free: usize,
    /// 历史峰值
    pub peak_live: usize,
    pub peak_busy: usize,
    pub peak_free: usize,
}

#[derive(Default)]
struct PoolInner {
    live: VecDeque<CommandListHandle>,
    busy: VecDeque<CommandListHandle>,
    free: VecDeque<CommandListHandle>,
    stats: PoolStats,
}

impl PoolInner {
    fn update_peaks(&mut self) {
        let stats = &mut self.stats;
        stats.live = self.live.len();
        stats.busy = self.busy.len();
        stats.free = self.free.len();
        stats.peak_live = stats.peak_live.max(stats.live);
        stats.peak_busy = stats.peak_busy.max(stats.busy);
        stats.peak_free = stats.peak_free.max(stats.free);
    }
}

/// 命令列表池
pub struct CommandListPool {
    queue_type: QueueType,
    device: Arc<dyn NativeDevice>,
    fences: Arc<FenceSet>,
    queue: Arc<AsyncCommandQueue>,
    config: SchedulerConfig,
    inner: Mutex<PoolInner>,
}

impl CommandListPool {
    pub fn new(
        queue_type: QueueType,
        device: Arc<dyn NativeDevice>,
        fences: Arc<FenceSet>,
        queue: Arc<AsyncCommandQueue>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            queue_type,
            device,
            fences,
            queue,
            config: config.clone(),
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn queue(&self) -> &Arc<AsyncCommandQueue> {
        &self.queue
    }

    pub fn stats(&self) -> PoolStats {
        let mut inner = self.inner.lock();
        inner.update_peaks();
        inner.stats
    }

    /// 获取一个开始录制的命令列表
    pub fn acquire_command_list(&self) -> Result<CommandListHandle> {
        let mut inner = self.inner.lock();
        self.schedule_locked(&mut inner);
        self.acquire_locked(&mut inner)
    }

    /// 一次获取多个命令列表，围栏值连续
    pub fn acquire_command_lists(&self, count: usize) -> Result<Vec<CommandListHandle>> {
        let mut inner = self.inner.lock();
        self.schedule_locked(&mut inner);
        (0..count).map(|_| self.acquire_locked(&mut inner)).collect()
    }

    fn acquire_locked(&self, inner: &mut PoolInner) -> Result<CommandListHandle> {
        let handle = self.create_or_reuse_command_list(inner)?;

        // 在池锁内分配围栏值，live 的顺序即围栏值的顺序
        let fence_value = self.fences.allocate_next_value(self.queue_type);
        handle.lock().register(fence_value);

        inner.live.push_back(handle.clone());
        inner.stats.acquired += 1;
        inner.update_peaks();
        Ok(handle)
    }

    fn create_or_reuse_command_list(&self, inner: &mut PoolInner) -> Result<CommandListHandle> {
        if let Some(handle) = inner.free.pop_front() {
            return Ok(handle);
        }

        let native = self.device.create_command_list(self.queue_type).map_err(|e| {
            error!(queue = %self.queue_type, "Failed to create command list: {}", e);
            e
        })?;
        inner.stats.created += 1;
        debug!(queue = %self.queue_type, total = inner.stats.created, "Command list created");

        Ok(CommandListHandle::new(CommandList::new(
            native,
            Arc::clone(&self.fences),
            &self.config,
        )))
    }

    /// 交还命令列表
    ///
    /// 仍在录制的列表会被强制关闭。`wait` 为真时阻塞到 GPU 执行完毕。
    pub fn forfeit_command_list(&self, handle: &CommandListHandle, wait: bool) {
        self.forfeit_command_lists(std::slice::from_ref(handle), wait);
    }

    /// 交还多个命令列表
    pub fn forfeit_command_lists(&self, handles: &[CommandListHandle], wait: bool) {
        {
            let mut inner = self.inner.lock();
            for handle in handles {
                let mut list = handle.lock();
                if list.state() == ListState::Started {
                    error!(
                        queue = %self.queue_type,
                        fence = list.fence_value(),
                        "Forfeiting a command list that was not closed"
                    );
                    if let Err(e) = list.close() {
                        error!(queue = %self.queue_type, "Failed to close command list: {}", e);
                    }
                }
                list.schedule();
            }
            self.schedule_locked(&mut inner);
        }

        if wait {
            for handle in handles {
                self.fences.wait_for_fence(handle.fence_value(), self.queue_type);
            }
        }
    }

    /// 调度维护
    pub fn schedule_command_lists(&self) {
        let mut inner = self.inner.lock();
        self.schedule_locked(&mut inner);
    }

    fn schedule_locked(&self, inner: &mut PoolInner) {
        // (a) GPU 已完成的列表移入 busy 并开始重置
        while let Some(head) = inner.live.front() {
            if !head.status().is_finished_on_gpu(&self.fences) {
                break;
            }
            let Some(handle) = inner.live.pop_front() else {
                break;
            };
            handle.status().set_state(ListState::Finished);
            handle.status().set_state(ListState::Clearing);
            self.queue
                .reset_command_list(Arc::clone(handle.native()), Arc::clone(handle.status()));
            inner.busy.push_back(handle);
        }

        // (b) 按注册顺序提交，遇到尚未交还的列表即停止
        for handle in inner.live.iter() {
            match handle.state() {
                ListState::Scheduled => {
                    handle.lock().submit(&self.queue);
                    inner.stats.submitted += 1;
                }
                ListState::Submitted | ListState::Finished => {}
                _ => break,
            }
        }

        // (c) 重置完成的列表进入 free
        while let Some(head) = inner.busy.front() {
            if head.state() != ListState::Free {
                break;
            }
            if let Some(handle) = inner.busy.pop_front() {
                inner.free.push_back(handle);
            }
        }

        inner.update_peaks();
        trace!(
            queue = %self.queue_type,
            live = inner.live.len(),
            busy = inner.busy.len(),
            free = inner.free.len(),
            "Command lists scheduled"
        );
    }

    /// 等待全部列表执行完并释放所有列表对象
    ///
    /// 仍有未交还的列表时放弃并返回 `false`。
    pub fn clear(&self) -> bool {
        {
            let inner = self.inner.lock();
            if inner.live.iter().any(|l| l.state() < ListState::Scheduled) {
                warn!(queue = %self.queue_type, "Clearing a pool with unfinished command lists");
                return false;
            }
        }

        self.schedule_command_lists();
        self.queue.flush();
        self.fences
            .wait_for_fence(self.fences.submitted_value(self.queue_type), self.queue_type);

        // 先发出重置，再回收到 free
        self.schedule_command_lists();
        self.queue.flush();
        self.schedule_command_lists();

        let mut inner = self.inner.lock();
        let released = inner.free.len();
        inner.free.clear();
        inner.update_peaks();
        debug!(queue = %self.queue_type, released, "Command list pool cleared");
        inner.live.is_empty() && inner.busy.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::types::{Format, ResourceDesc, ResourceFlags, ResourceStates};
    use crate::gfx::SoftwareDevice;
    use crate::renderer::commands::sync::AccessKind;
    use crate::renderer::resources::{Resource, ResourceView};
    use std::sync::Weak;

    struct Fixture {
        device: Arc<SoftwareDevice>,
        fences: Arc<FenceSet>,
        pool: CommandListPool,
    }

    fn fixture(queue_type: QueueType, async_mode: bool) -> Fixture {
        let device = Arc::new(SoftwareDevice::new());
        let fences = Arc::new(FenceSet::new(device.as_ref()).unwrap());
        let native = device.create_command_queue(queue_type).unwrap();
        let queue = Arc::new(AsyncCommandQueue::new(native, Arc::clone(&fences), async_mode, 1).unwrap());
        let pool = CommandListPool::new(
            queue_type,
            device.clone(),
            Arc::clone(&fences),
            queue,
            &SchedulerConfig::default(),
        );
        Fixture { device, fences, pool }
    }

    #[test]
    fn test_draw_is_signalled_after_execution() {
        let f = fixture(QueueType::Graphics, true);
        let timeline = f.device.queue(QueueType::Graphics).unwrap();
        timeline.suspend();

        let list = f.pool.acquire_command_list().unwrap();
        let fence = list.fence_value();
        {
            let mut guard = list.lock();
            guard.draw(3, 1);
            guard.close().unwrap();
        }
        f.pool.forfeit_command_list(&list, false);
        f.pool.queue().flush();

        assert_eq!(list.state(), ListState::Submitted);
        assert_eq!(f.fences.submitted_value(QueueType::Graphics), fence);
        assert!(!f.fences.is_completed(fence, QueueType::Graphics));

        timeline.resume();
        f.fences.wait_for_fence(fence, QueueType::Graphics);
        assert!(f.fences.is_completed(fence, QueueType::Graphics));
        assert_eq!(timeline.executed_list_count(), 1);
    }

    #[test]
    fn test_empty_list_is_rewound() {
        let f = fixture(QueueType::Graphics, true);
        let list = f.pool.acquire_command_list().unwrap();
        let before = f.fences.current_value(QueueType::Graphics);

        list.lock().close().unwrap();
        f.pool.forfeit_command_list(&list, false);
        f.pool.queue().flush();

        assert_eq!(f.fences.current_value(QueueType::Graphics), before - 1);
        assert_eq!(list.fence_value(), 0);
        assert!(list.status().is_finished_on_gpu(&f.fences));
        assert_eq!(f.device.queue(QueueType::Graphics).unwrap().executed_list_count(), 0);
    }

    fn render_target(f: &Fixture) -> Resource {
        let desc = ResourceDesc::texture_2d(64, 64, Format::R8G8B8A8Unorm, 1, 1)
            .with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
        let native = f
            .device
            .create_committed_resource(&desc, ResourceStates::RENDER_TARGET)
            .unwrap();
        Resource::new(native, ResourceStates::RENDER_TARGET, false, Weak::new())
    }

    #[test]
    fn test_list_stamped_on_resource_is_not_rewound() {
        let f = fixture(QueueType::Graphics, true);
        let texture = render_target(&f);
        let list = f.pool.acquire_command_list().unwrap();
        let fence = list.fence_value();
        {
            let mut guard = list.lock();
            // 已经是渲染目标，不产生屏障
            guard.prepare_render_target_usage(&texture, &ResourceView::whole());
            assert!(!guard.is_utilized());
            assert!(!guard.is_rewindable());
            guard.close().unwrap();
        }
        f.pool.forfeit_command_list(&list, false);
        f.pool.queue().flush();

        assert_eq!(list.fence_value(), fence);
        assert_eq!(f.fences.current_value(QueueType::Graphics), fence);
        assert_eq!(texture.fence_value(AccessKind::Write, QueueType::Graphics), fence);

        texture.wait_for_unused(&f.fences);
        assert!(!texture.is_used(&f.fences));
        assert!(list.status().is_finished_on_gpu(&f.fences));
        assert_eq!(f.device.queue(QueueType::Graphics).unwrap().executed_list_count(), 0);
    }

    #[test]
    fn test_fused_round_trip_leaves_list_empty() {
        let f = fixture(QueueType::Graphics, false);
        let texture = render_target(&f);
        let list = f.pool.acquire_command_list().unwrap();
        {
            let mut guard = list.lock();
            texture.transition_barrier(&mut guard, ResourceStates::PIXEL_SHADER_RESOURCE);
            assert!(guard.is_utilized());
            texture.transition_barrier(&mut guard, ResourceStates::RENDER_TARGET);
            assert_eq!(guard.pending_barrier_count(), 0);
            assert!(!guard.is_utilized());
            assert_eq!(guard.stats().commands, 0);
            guard.close().unwrap();
        }
        f.pool.forfeit_command_list(&list, false);

        assert_eq!(list.fence_value(), 0);
        assert_eq!(f.fences.current_value(QueueType::Graphics), 0);
        assert_eq!(f.fences.submitted_value(QueueType::Graphics), 0);
        assert_eq!(f.device.queue(QueueType::Graphics).unwrap().executed_list_count(), 0);
    }

    #[test]
    fn test_empty_list_behind_open_list_still_signals() {
        let f = fixture(QueueType::Compute, false);
        let empty = f.pool.acquire_command_list().unwrap();
        let open = f.pool.acquire_command_list().unwrap();
        let empty_fence = empty.fence_value();

        empty.lock().close().unwrap();
        f.pool.forfeit_command_list(&empty, false);
        // 后面还有列表占用更大的值，不能回退
        assert_eq!(empty.fence_value(), empty_fence);
        assert_eq!(empty.state(), ListState::Submitted);

        {
            let mut guard = open.lock();
            guard.dispatch(1, 1, 1);
            guard.close().unwrap();
        }
        f.pool.forfeit_command_list(&open, true);
        assert!(f.fences.is_completed(empty_fence, QueueType::Compute));
        assert_eq!(f.device.queue(QueueType::Compute).unwrap().executed_list_count(), 1);
    }

    #[test]
    fn test_submission_follows_registration_order() {
        let f = fixture(QueueType::Copy, false);
        let lists = f.pool.acquire_command_lists(2).unwrap();
        assert_eq!(lists[1].fence_value(), lists[0].fence_value() + 1);

        for list in lists.iter().rev() {
            let mut guard = list.lock();
            guard.record(crate::gfx::types::GpuCommand::BeginQuery { index: 0 });
            guard.close().unwrap();
        }

        // 后注册的列表先交还，必须等待前一个
        f.pool.forfeit_command_list(&lists[1], false);
        assert_eq!(lists[1].state(), ListState::Scheduled);
        assert_eq!(f.fences.submitted_value(QueueType::Copy), 0);

        f.pool.forfeit_command_list(&lists[0], false);
        assert_eq!(lists[0].state(), ListState::Submitted);
        assert_eq!(lists[1].state(), ListState::Submitted);
        assert_eq!(f.fences.submitted_value(QueueType::Copy), lists[1].fence_value());
    }

    #[test]
    fn test_unclosed_list_is_closed_on_forfeit() {
        let f = fixture(QueueType::Graphics, false);
        let list = f.pool.acquire_command_list().unwrap();
        list.lock().draw(1, 1);
        f.pool.forfeit_command_list(&list, true);
        assert!(list.status().is_finished_on_gpu(&f.fences));
    }

    #[test]
    fn test_finished_lists_are_reused() {
        let f = fixture(QueueType::Graphics, false);
        for _ in 0..3 {
            let list = f.pool.acquire_command_list().unwrap();
            {
                let mut guard = list.lock();
                guard.draw(3, 1);
                guard.close().unwrap();
            }
            f.pool.forfeit_command_list(&list, true);
        }
        let stats = f.pool.stats();
        assert!(stats.created < 3, "created {} lists", stats.created);
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.submitted, 3);
    }

    #[test]
    fn test_clear_refuses_open_lists() {
        let f = fixture(QueueType::Graphics, true);
        let list = f.pool.acquire_command_list().unwrap();
        assert!(!f.pool.clear());

        list.lock().close().unwrap();
        f.pool.forfeit_command_list(&list, false);
        assert!(f.pool.clear());
        assert_eq!(f.pool.stats().free, 0);
    }
}
