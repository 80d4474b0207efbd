//! 命令调度器
//!
//! 拥有每个队列类别的命令列表池、异步提交队列和共享的围栏集合，
//! 并为每个队列保持一个正在录制的“当前”命令列表。
//!
//! 每帧结束时：
//!
//! 1. 交还所有当前列表并记录本帧的 `submitted` 快照
//! 2. 立即重新获取当前列表
//! 3. 让提交线程追上快照
//! 4. 按最大帧延迟节流 CPU
//! 5. 用新完成的围栏值回收释放堆，用更早的快照驱逐回收堆

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::command::CommandListHandle;
use super::pool::{CommandListPool, PoolStats};
use super::queue::AsyncCommandQueue;
use super::sync::{FenceSet, FenceValues};
use crate::core::config::SchedulerConfig;
use crate::core::error::Result;
use crate::gfx::backend::{NativeDevice, NativeSwapChain};
use crate::gfx::types::QueueType;
use crate::renderer::resources::{HeapMovement, Resource, ResourceHeaps};

/// 帧快照环形缓冲区大小，大于任何允许的帧延迟和回收帧数
pub const FRAME_FENCES: usize = 32;

/// 队列边界事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// 当前列表即将被关闭并交还
    Cease,
    /// 新的当前列表已经开始录制
    Resume,
}

/// 队列边界回调
pub type QueueCallback = Arc<dyn Fn(QueueType, QueueEvent) + Send + Sync>;

/// 回调注册标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct FrameRing {
    fences: [FenceValues; FRAME_FENCES],
    index: usize,
    frames: u64,
}

/// 命令调度器
pub struct CommandScheduler {
    config: SchedulerConfig,
    fences: Arc<FenceSet>,
    heaps: Arc<ResourceHeaps>,
    queues: [Arc<AsyncCommandQueue>; QueueType::COUNT],
    pools: [CommandListPool; QueueType::COUNT],
    current: Mutex<[Option<CommandListHandle>; QueueType::COUNT]>,
    callbacks: Mutex<Vec<(CallbackId, QueueCallback)>>,
    next_callback: AtomicU64,
    frames: Mutex<FrameRing>,
    shut_down: AtomicBool,
}

impl CommandScheduler {
    /// 创建围栏、异步提交队列与命令列表池
    pub fn new(device: Arc<dyn NativeDevice>, heaps: Arc<ResourceHeaps>, config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let fences = Arc::new(FenceSet::new(device.as_ref())?);
        let make_queue = |queue_type: QueueType| -> Result<Arc<AsyncCommandQueue>> {
            let native = device.create_command_queue(queue_type).map_err(|e| {
                error!(queue = %queue_type, "Failed to create command queue: {}", e);
                e
            })?;
            Ok(Arc::new(AsyncCommandQueue::new(
                native,
                Arc::clone(&fences),
                config.is_async(queue_type),
                config.max_pending_presents,
            )?))
        };
        let queues = [
            make_queue(QueueType::Graphics)?,
            make_queue(QueueType::Compute)?,
            make_queue(QueueType::Copy)?,
        ];
        let pools = QueueType::ALL.map(|queue_type| {
            CommandListPool::new(
                queue_type,
                Arc::clone(&device),
                Arc::clone(&fences),
                Arc::clone(&queues[queue_type.index()]),
                config,
            )
        });

        info!(
            backend = device.backend_name(),
            max_frame_latency = config.max_frame_latency,
            barriers = ?config.barrier_batching,
            "Command scheduler created"
        );

        Ok(Self {
            config: config.clone(),
            fences,
            heaps,
            queues,
            pools,
            current: Mutex::new(Default::default()),
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            frames: Mutex::new(FrameRing {
                fences: [FenceValues::default(); FRAME_FENCES],
                index: 0,
                frames: 0,
            }),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn fences(&self) -> &Arc<FenceSet> {
        &self.fences
    }

    pub fn queue(&self, queue_type: QueueType) -> &Arc<AsyncCommandQueue> {
        &self.queues[queue_type.index()]
    }

    pub fn pool(&self, queue_type: QueueType) -> &CommandListPool {
        &self.pools[queue_type.index()]
    }

    pub fn pool_stats(&self, queue_type: QueueType) -> PoolStats {
        self.pool(queue_type).stats()
    }

    /// 已结束的帧数
    pub fn frame_count(&self) -> u64 {
        self.frames.lock().frames
    }

    /// 为每个队列获取并打开当前列表
    pub fn begin_scheduling(&self) -> Result<()> {
        self.resume_all_command_queues()
    }

    /// 某个队列的当前命令列表
    pub fn command_list(&self, queue_type: QueueType) -> Option<CommandListHandle> {
        self.current.lock()[queue_type.index()].clone()
    }

    // ------------------------------------------------------------------
    // 回调
    // ------------------------------------------------------------------

    /// 注册队列边界回调
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(QueueType, QueueEvent) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Arc::new(callback)));
        id
    }

    /// 注销回调，返回是否找到
    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(registered, _)| *registered != id);
        callbacks.len() != before
    }

    fn notify(&self, queue_type: QueueType, event: QueueEvent) {
        // 回调可能再次进入调度器，调用时不持有锁
        let callbacks: Vec<QueueCallback> = self.callbacks.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(queue_type, event);
        }
    }

    // ------------------------------------------------------------------
    // 队列边界
    // ------------------------------------------------------------------

    /// 关闭并交还当前列表，之后该队列没有当前列表
    pub fn cease_command_queue(&self, queue_type: QueueType, wait: bool) {
        self.notify(queue_type, QueueEvent::Cease);

        let Some(handle) = self.current.lock()[queue_type.index()].take() else {
            return;
        };
        if let Err(e) = handle.lock().close() {
            error!(queue = %queue_type, "Failed to close command list: {}", e);
        }
        self.pool(queue_type).forfeit_command_list(&handle, wait);
        trace!(queue = %queue_type, fence = handle.fence_value(), "Command queue ceased");
    }

    /// 获取并打开新的当前列表
    pub fn resume_command_queue(&self, queue_type: QueueType) -> Result<()> {
        {
            let mut current = self.current.lock();
            if current[queue_type.index()].is_none() {
                current[queue_type.index()] = Some(self.pool(queue_type).acquire_command_list()?);
            }
        }
        self.notify(queue_type, QueueEvent::Resume);
        Ok(())
    }

    pub fn cease_all_command_queues(&self, wait: bool) {
        for queue_type in QueueType::ALL {
            self.cease_command_queue(queue_type, wait);
        }
    }

    pub fn resume_all_command_queues(&self) -> Result<()> {
        for queue_type in QueueType::ALL {
            self.resume_command_queue(queue_type)?;
        }
        Ok(())
    }

    /// 提交某个队列的当前列表并开始新的列表
    pub fn submit_commands(&self, queue_type: QueueType, wait: bool) -> Result<()> {
        self.cease_command_queue(queue_type, wait);
        self.resume_command_queue(queue_type)
    }

    /// 提交所有队列的当前列表，返回提交后的 `submitted` 值
    pub fn submit_all_commands(&self, wait: bool) -> Result<FenceValues> {
        self.cease_all_command_queues(wait);
        let submitted = self.fences.submitted_values();
        self.resume_all_command_queues()?;
        Ok(submitted)
    }

    /// 确保 `value` 之前的工作已交给提交线程
    pub fn submit_commands_to_fence(&self, queue_type: QueueType, value: u64) -> Result<()> {
        if value > self.fences.submitted_value(queue_type) {
            self.submit_commands(queue_type, false)?;
        }
        Ok(())
    }

    /// 提交所有队列并等待提交线程清空
    pub fn flush(&self, wait: bool) -> Result<()> {
        let submitted = self.submit_all_commands(false)?;
        for queue in &self.queues {
            queue.flush();
        }
        if wait {
            self.fences.wait_for_fences(&submitted);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 围栏
    // ------------------------------------------------------------------

    /// 代表“到目前为止录制的全部工作”的围栏值
    ///
    /// 当前列表可能被回退（没有命令、也没有资源记录它的围栏值）时返回前一个值。
    pub fn insert_fence(&self, queue_type: QueueType) -> u64 {
        match self.command_list(queue_type) {
            Some(handle) => {
                let list = handle.lock();
                if !list.is_rewindable() {
                    list.fence_value()
                } else {
                    list.fence_value().saturating_sub(1)
                }
            }
            None => self.fences.current_value(queue_type),
        }
    }

    /// 三个队列的 `insert_fence`
    pub fn insert_fences(&self) -> FenceValues {
        let mut values = FenceValues::default();
        for queue_type in QueueType::ALL {
            values[queue_type] = self.insert_fence(queue_type);
        }
        values
    }

    pub fn test_for_fence(&self, queue_type: QueueType, value: u64) -> bool {
        self.fences.is_completed(value, queue_type)
    }

    /// 提交并让提交线程处理到 `value`
    pub fn flush_to_fence(&self, queue_type: QueueType, value: u64) -> Result<()> {
        self.submit_commands_to_fence(queue_type, value)?;
        self.queue(queue_type).flush_to(value);
        Ok(())
    }

    /// 在 CPU 上等待 `value` 完成，必要时先提交
    pub fn wait_for_fence(&self, queue_type: QueueType, value: u64) -> Result<()> {
        if self.test_for_fence(queue_type, value) {
            return Ok(());
        }
        self.flush_to_fence(queue_type, value)?;
        self.fences.wait_for_fence(value, queue_type);
        Ok(())
    }

    pub fn wait_for_fences(&self, values: &FenceValues) -> Result<()> {
        for queue_type in QueueType::ALL {
            self.wait_for_fence(queue_type, values[queue_type])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 呈现与帧
    // ------------------------------------------------------------------

    /// 把后台缓冲区转换到呈现状态，提交图形队列后呈现
    pub fn present(&self, swap_chain: Arc<dyn NativeSwapChain>, back_buffer: &Resource, sync_interval: u32) -> Result<()> {
        if let Some(handle) = self.command_list(QueueType::Graphics) {
            handle.lock().prepare_present_usage(back_buffer);
        }
        self.submit_commands(QueueType::Graphics, false)?;
        self.queue(QueueType::Graphics).present(swap_chain, sync_interval);
        Ok(())
    }

    /// 等待下一个在途的呈现完成
    pub fn flush_next_present(&self) {
        self.queue(QueueType::Graphics).flush_next_present();
    }

    /// 结束一帧
    ///
    /// `wait` 为真时等待本帧全部完成，否则按 `max_frame_latency` 节流。
    pub fn end_of_frame(&self, wait: bool) -> Result<HeapMovement> {
        if self.shut_down.load(Ordering::Acquire) {
            warn!("End of frame after scheduler shutdown");
            return Ok(HeapMovement::default());
        }

        self.cease_all_command_queues(false);
        let snapshot = self.fences.submitted_values();
        let (index, frames) = {
            let mut ring = self.frames.lock();
            let index = ring.index;
            ring.fences[index] = snapshot;
            (index, ring.frames)
        };
        self.resume_all_command_queues()?;

        for queue_type in QueueType::ALL {
            self.queue(queue_type).flush_to(snapshot[queue_type]);
        }

        let latency = self.config.max_frame_latency as usize;
        if wait {
            self.fences.wait_for_fences(&snapshot);
        } else if latency > 0 && frames >= latency as u64 {
            let previous = self.frames.lock().fences[(index + FRAME_FENCES - latency) % FRAME_FENCES];
            trace!(?previous, "Throttling frame");
            self.fences.wait_for_fences(&previous);
        }

        let recycle_frames = self.config.recycle_heap_frames;
        let prune = (frames >= recycle_frames as u64)
            .then(|| self.frames.lock().fences[(index + FRAME_FENCES - recycle_frames) % FRAME_FENCES]);
        let completed = self.fences.completed_values();
        let movement = self.heaps.flush_release_heap(&completed, prune.as_ref());

        {
            let mut ring = self.frames.lock();
            ring.index = (index + 1) % FRAME_FENCES;
            ring.frames += 1;
        }

        trace!(frame = frames, ?snapshot, ?completed, "End of frame");
        Ok(movement)
    }

    /// 提交剩余工作、等待 GPU 空闲并停止提交线程
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cease_all_command_queues(false);
        for queue in &self.queues {
            queue.flush();
        }
        self.fences.wait_for_fences(&self.fences.submitted_values());

        for pool in &self.pools {
            if !pool.clear() {
                warn!(queue = %pool.queue_type(), "Command lists still recording at shutdown");
            }
        }
        for queue in &self.queues {
            queue.shutdown();
        }
        debug!(frames = self.frame_count(), "Command scheduler shut down");
    }
}

impl Drop for CommandScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
