//! 软件硬件队列
//!
//! 每个队列拥有一条 GPU 时间线线程，按提交顺序处理执行、信号、等待和呈现，
//! 并把处理过的事件记录下来供测试检查。时间线可以被挂起，
//! 用来观察“已提交但 GPU 尚未完成”的中间状态。

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use tracing::{error, trace};

use super::command_list::SoftwareCommandList;
use super::fence::SoftwareFence;
use crate::core::error::{DeviceError, Result};
use crate::gfx::backend::{NativeCommandList, NativeFence, NativeQueue, NativeSwapChain};
use crate::gfx::types::{GpuCommand, QueueType};

/// GPU 时间线上处理过的事件
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    /// GPU 端等待已满足
    Wait { fence: u64, value: u64 },
    /// 执行了一个命令列表
    Execute { commands: Vec<GpuCommand> },
    /// 围栏信号
    Signal { fence: u64, value: u64 },
    /// 交换链呈现
    Present { sync_interval: u32 },
}

enum TimelineOp {
    Execute(Vec<GpuCommand>),
    Signal(Arc<dyn NativeFence>, u64),
    Wait(Arc<dyn NativeFence>, u64),
    Present(Arc<dyn NativeSwapChain>, u32),
    Idle(Sender<()>),
}

/// 挂起开关
#[derive(Default)]
struct Gate {
    suspended: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut suspended = self.suspended.lock();
        while *suspended {
            self.changed.wait(&mut suspended);
        }
    }

    fn set(&self, suspended: bool) {
        *self.suspended.lock() = suspended;
        self.changed.notify_all();
    }
}

/// 软件硬件队列
pub struct SoftwareQueue {
    queue_type: QueueType,
    sender: Sender<TimelineOp>,
    gate: Arc<Gate>,
    events: Arc<Mutex<Vec<TimelineEvent>>>,
}

fn fence_id(fence: &Arc<dyn NativeFence>) -> u64 {
    fence
        .as_any()
        .downcast_ref::<SoftwareFence>()
        .map(SoftwareFence::id)
        .unwrap_or(u64::MAX)
}

impl SoftwareQueue {
    /// 创建队列并启动 GPU 时间线线程
    pub fn new(queue_type: QueueType) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let gate = Arc::new(Gate::default());
        let events = Arc::new(Mutex::new(Vec::new()));

        let timeline_gate = Arc::clone(&gate);
        let timeline_events = Arc::clone(&events);
        thread::Builder::new()
            .name(format!("gpu-timeline-{}", queue_type))
            .spawn(move || run_timeline(receiver, timeline_gate, timeline_events))
            .map_err(|e| DeviceError::ThreadSpawn(e.to_string()))?;

        Ok(Self { queue_type, sender, gate, events })
    }

    /// 挂起 GPU 时间线，已入队的工作暂不处理
    pub fn suspend(&self) {
        self.gate.set(true);
    }

    /// 恢复 GPU 时间线
    pub fn resume(&self) {
        self.gate.set(false);
    }

    /// 阻塞直到时间线处理完此前入队的所有操作
    pub fn wait_idle(&self) {
        let (done, wait) = channel::bounded(1);
        if self.sender.send(TimelineOp::Idle(done)).is_ok() {
            let _ = wait.recv();
        }
    }

    /// 已处理事件的快照
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.lock().clone()
    }

    /// 已执行的命令列表数量
    pub fn executed_list_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, TimelineEvent::Execute { .. }))
            .count()
    }

    fn push(&self, op: TimelineOp) -> Result<()> {
        self.sender
            .send(op)
            .map_err(|_| DeviceError::Submission(format!("{} timeline stopped", self.queue_type)).into())
    }
}

fn run_timeline(receiver: Receiver<TimelineOp>, gate: Arc<Gate>, events: Arc<Mutex<Vec<TimelineEvent>>>) {
    while let Ok(op) = receiver.recv() {
        gate.pass();
        match op {
            TimelineOp::Execute(commands) => {
                events.lock().push(TimelineEvent::Execute { commands });
            }
            TimelineOp::Signal(fence, value) => {
                events.lock().push(TimelineEvent::Signal { fence: fence_id(&fence), value });
                fence.signal(value);
            }
            TimelineOp::Wait(fence, value) => {
                fence.wait_on_cpu(value);
                events.lock().push(TimelineEvent::Wait { fence: fence_id(&fence), value });
            }
            TimelineOp::Present(swap_chain, sync_interval) => {
                if let Err(e) = swap_chain.present(sync_interval) {
                    error!("Software present failed: {}", e);
                }
                events.lock().push(TimelineEvent::Present { sync_interval });
            }
            TimelineOp::Idle(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl NativeQueue for SoftwareQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn execute_command_lists(&self, lists: &[&dyn NativeCommandList]) -> Result<()> {
        for list in lists {
            let software = list
                .as_any()
                .downcast_ref::<SoftwareCommandList>()
                .ok_or_else(|| DeviceError::Submission("foreign command list".to_string()))?;

            if !software.is_closed() {
                return Err(DeviceError::Submission("executing an open command list".to_string()).into());
            }
            trace!(queue = %self.queue_type, commands = software.commands().len(), "Execute");
            self.push(TimelineOp::Execute(software.commands()))?;
        }
        Ok(())
    }

    fn signal(&self, fence: &Arc<dyn NativeFence>, value: u64) -> Result<()> {
        self.push(TimelineOp::Signal(Arc::clone(fence), value))
    }

    fn wait(&self, fence: &Arc<dyn NativeFence>, value: u64) -> Result<()> {
        self.push(TimelineOp::Wait(Arc::clone(fence), value))
    }

    fn present(&self, swap_chain: &Arc<dyn NativeSwapChain>, sync_interval: u32) -> Result<()> {
        self.push(TimelineOp::Present(Arc::clone(swap_chain), sync_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_list(commands: Vec<GpuCommand>) -> SoftwareCommandList {
        let list = SoftwareCommandList::new(QueueType::Graphics);
        for command in commands {
            list.record(command).unwrap();
        }
        list.close().unwrap();
        list
    }

    #[test]
    fn test_execute_then_signal_in_order() {
        let queue = SoftwareQueue::new(QueueType::Graphics).unwrap();
        let fence: Arc<dyn NativeFence> = Arc::new(SoftwareFence::new(7, 0));
        let list = closed_list(vec![GpuCommand::Draw { vertex_count: 3, instance_count: 1 }]);

        queue.execute_command_lists(&[&list]).unwrap();
        queue.signal(&fence, 1).unwrap();
        fence.wait_on_cpu(1);

        let events = queue.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TimelineEvent::Execute { .. }));
        assert_eq!(events[1], TimelineEvent::Signal { fence: 7, value: 1 });
    }

    #[test]
    fn test_open_list_is_rejected() {
        let queue = SoftwareQueue::new(QueueType::Graphics).unwrap();
        let list = SoftwareCommandList::new(QueueType::Graphics);
        assert!(queue.execute_command_lists(&[&list]).is_err());
    }

    #[test]
    fn test_suspended_timeline_holds_work() {
        let queue = SoftwareQueue::new(QueueType::Copy).unwrap();
        let fence: Arc<dyn NativeFence> = Arc::new(SoftwareFence::new(0, 0));

        queue.suspend();
        queue.signal(&fence, 4).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(fence.completed_value(), 0);

        queue.resume();
        queue.wait_idle();
        assert_eq!(fence.completed_value(), 4);
    }

    #[test]
    fn test_gpu_wait_blocks_following_work() {
        let queue = SoftwareQueue::new(QueueType::Compute).unwrap();
        let other: Arc<dyn NativeFence> = Arc::new(SoftwareFence::new(1, 0));
        let own: Arc<dyn NativeFence> = Arc::new(SoftwareFence::new(2, 0));

        queue.wait(&other, 10).unwrap();
        queue.signal(&own, 1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(own.completed_value(), 0);

        other.signal(10);
        own.wait_on_cpu(1);
        assert_eq!(queue.events()[0], TimelineEvent::Wait { fence: 1, value: 10 });
    }
}
