//! 异步提交队列
//!
//! 每个硬件队列类别一个提交线程，从无锁队列中取出任务并调用原生 API。
//! 录制线程只负责入队，真正的硬件提交不会阻塞它。
//! 关闭异步模式时任务在调用线程上直接执行，`flush` 系列方法在两种模式下行为一致。

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

use super::command::{ListState, ListStatus};
use super::sync::{FenceSet, FenceValues};
use crate::core::error::{DeviceError, Result};
use crate::gfx::backend::{NativeCommandList, NativeQueue, NativeSwapChain};
use crate::gfx::types::QueueType;

/// 提交任务
pub enum SubmissionTask {
    /// 执行已关闭的命令列表
    ExecuteCommandList(Arc<dyn NativeCommandList>),
    /// 重置命令列表，完成后列表回到 Free
    ResetCommandList {
        list: Arc<dyn NativeCommandList>,
        status: Arc<ListStatus>,
    },
    /// 发出本队列的围栏信号
    SignalFence(u64),
    /// GPU 端等待某个队列的围栏
    WaitForFence { queue: QueueType, value: u64 },
    /// GPU 端等待三个队列的围栏
    WaitForFences(FenceValues),
    /// 多适配器同步
    SyncAdapters(u64),
    /// 呈现交换链
    Present {
        swap_chain: Arc<dyn NativeSwapChain>,
        sync_interval: u32,
    },
}

impl SubmissionTask {
    fn name(&self) -> &'static str {
        match self {
            SubmissionTask::ExecuteCommandList(_) => "execute",
            SubmissionTask::ResetCommandList { .. } => "reset",
            SubmissionTask::SignalFence(_) => "signal",
            SubmissionTask::WaitForFence { .. } => "wait",
            SubmissionTask::WaitForFences(_) => "wait-all",
            SubmissionTask::SyncAdapters(_) => "sync-adapters",
            SubmissionTask::Present { .. } => "present",
        }
    }
}

/// 计数信号量，队列为空时提交线程在此休眠
#[derive(Default)]
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }
}

struct Shared {
    queue_type: QueueType,
    native: Arc<dyn NativeQueue>,
    fences: Arc<FenceSet>,
    tasks: SegQueue<SubmissionTask>,
    semaphore: Semaphore,
    stop: AtomicBool,
    in_flight: AtomicUsize,
    pending_presents: AtomicU32,
    completed_presents: AtomicU64,
}

impl Shared {
    fn execute(&self, task: SubmissionTask) {
        trace!(queue = %self.queue_type, task = task.name(), "Processing submission task");

        let result = match task {
            SubmissionTask::ExecuteCommandList(list) => self.native.execute_command_lists(&[list.as_ref()]),
            SubmissionTask::ResetCommandList { list, status } => {
                let result = list.reset();
                status.set_state(ListState::Free);
                result
            }
            SubmissionTask::SignalFence(value) => {
                // signalled 必须先于原生信号前移，保证 completed ≤ signalled
                self.fences.set_signalled_value(self.queue_type, value);
                self.native.signal(self.fences.native_fence(self.queue_type), value)
            }
            SubmissionTask::WaitForFence { queue, value } => self.wait(queue, value),
            SubmissionTask::WaitForFences(values) => QueueType::ALL
                .iter()
                .try_for_each(|&queue| self.wait(queue, values[queue])),
            SubmissionTask::SyncAdapters(value) => self
                .native
                .sync_adapters(self.fences.native_fence(self.queue_type), value),
            SubmissionTask::Present { swap_chain, sync_interval } => {
                let result = self.native.present(&swap_chain, sync_interval);
                self.pending_presents.fetch_sub(1, Ordering::AcqRel);
                self.completed_presents.fetch_add(1, Ordering::AcqRel);
                result
            }
        };

        if let Err(e) = result {
            error!(queue = %self.queue_type, "Submission task failed: {}", e);
        }
    }

    /// 在调用线程上处理完队列中剩余的任务
    fn drain(&self) {
        while let Some(task) = self.tasks.pop() {
            self.execute(task);
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn wait(&self, queue: QueueType, value: u64) -> Result<()> {
        if value == 0 {
            return Ok(());
        }
        self.native.wait(self.fences.native_fence(queue), value)
    }
}

fn run_worker(shared: Arc<Shared>) {
    debug!(queue = %shared.queue_type, "Submission thread started");
    loop {
        shared.semaphore.acquire();
        match shared.tasks.pop() {
            Some(task) => {
                shared.execute(task);
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            None if shared.stop.load(Ordering::SeqCst) => break,
            None => {}
        }
    }
    debug!(queue = %shared.queue_type, "Submission thread stopped");
}

/// 异步提交队列
pub struct AsyncCommandQueue {
    shared: Arc<Shared>,
    async_mode: bool,
    max_pending_presents: u32,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncCommandQueue {
    /// 创建提交队列，异步模式下启动提交线程
    pub fn new(
        native: Arc<dyn NativeQueue>,
        fences: Arc<FenceSet>,
        async_mode: bool,
        max_pending_presents: u32,
    ) -> Result<Self> {
        let queue_type = native.queue_type();
        let shared = Arc::new(Shared {
            queue_type,
            native,
            fences,
            tasks: SegQueue::new(),
            semaphore: Semaphore::default(),
            stop: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            pending_presents: AtomicU32::new(0),
            completed_presents: AtomicU64::new(0),
        });

        let worker = if async_mode {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("submit-{}", queue_type))
                .spawn(move || run_worker(worker_shared))
                .map_err(|e| DeviceError::ThreadSpawn(e.to_string()))?;
            Some(handle)
        } else {
            None
        };

        debug!(queue = %queue_type, async_mode, "Submission queue created");
        Ok(Self {
            shared,
            async_mode,
            max_pending_presents: max_pending_presents.max(1),
            worker: Mutex::new(worker),
        })
    }

    pub fn queue_type(&self) -> QueueType {
        self.shared.queue_type
    }

    pub fn native(&self) -> &Arc<dyn NativeQueue> {
        &self.shared.native
    }

    pub fn is_async(&self) -> bool {
        self.async_mode
    }

    /// 入队一个任务；同步模式下立即执行
    pub fn enqueue(&self, task: SubmissionTask) {
        if !self.async_mode {
            self.shared.execute(task);
            return;
        }
        if self.shared.stop.load(Ordering::SeqCst) {
            warn!(queue = %self.queue_type(), task = task.name(), "Submission queue stopped, running task inline");
            self.shared.execute(task);
            return;
        }

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.tasks.push(task);
        self.shared.semaphore.release();

        // 入队时提交线程可能恰好退出
        if self.shared.stop.load(Ordering::SeqCst) {
            self.shared.drain();
        }
    }

    pub fn execute_command_list(&self, list: Arc<dyn NativeCommandList>) {
        self.enqueue(SubmissionTask::ExecuteCommandList(list));
    }

    pub fn reset_command_list(&self, list: Arc<dyn NativeCommandList>, status: Arc<ListStatus>) {
        self.enqueue(SubmissionTask::ResetCommandList { list, status });
    }

    pub fn signal_fence(&self, value: u64) {
        self.enqueue(SubmissionTask::SignalFence(value));
    }

    pub fn wait_for_fence(&self, queue: QueueType, value: u64) {
        if value != 0 {
            self.enqueue(SubmissionTask::WaitForFence { queue, value });
        }
    }

    pub fn wait_for_fences(&self, values: FenceValues) {
        if !values.is_zero() {
            self.enqueue(SubmissionTask::WaitForFences(values));
        }
    }

    pub fn sync_adapters(&self, value: u64) {
        self.enqueue(SubmissionTask::SyncAdapters(value));
    }

    /// 呈现交换链
    ///
    /// 在途的呈现超过上限时让出 CPU 直到 GPU 追上。
    pub fn present(&self, swap_chain: Arc<dyn NativeSwapChain>, sync_interval: u32) {
        self.shared.pending_presents.fetch_add(1, Ordering::AcqRel);
        self.enqueue(SubmissionTask::Present { swap_chain, sync_interval });

        while self.pending_present_count() > self.max_pending_presents && self.has_pending_tasks() {
            thread::yield_now();
        }
    }

    /// 让出 CPU 直到队列中的任务全部处理完
    pub fn flush(&self) {
        while self.has_pending_tasks() {
            thread::yield_now();
        }
    }

    /// 让出 CPU 直到 `value` 已被信号，或者队列已经清空
    pub fn flush_to(&self, value: u64) {
        while self.shared.fences.signalled_value(self.queue_type()) < value && self.has_pending_tasks() {
            thread::yield_now();
        }
    }

    /// 只等待下一个在途的呈现完成
    pub fn flush_next_present(&self) {
        if self.pending_present_count() == 0 {
            return;
        }
        let seen = self.completed_present_count();
        while self.completed_present_count() == seen && self.has_pending_tasks() {
            thread::yield_now();
        }
    }

    /// 尚未处理完的任务数
    pub fn pending_task_count(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    fn has_pending_tasks(&self) -> bool {
        self.pending_task_count() > 0
    }

    pub fn pending_present_count(&self) -> u32 {
        self.shared.pending_presents.load(Ordering::Acquire)
    }

    pub fn completed_present_count(&self) -> u64 {
        self.shared.completed_presents.load(Ordering::Acquire)
    }

    /// 处理完剩余任务后停止提交线程
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.semaphore.release();
        if handle.join().is_err() {
            error!(queue = %self.queue_type(), "Submission thread panicked");
        }
        self.shared.drain();
    }
}

impl Drop for AsyncCommandQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
