//! 软件命令列表
//!
//! 只按顺序保存记录的命令，执行时由队列取出快照。

use parking_lot::Mutex;
use std::any::Any;

use crate::core::error::{DeviceError, Result};
use crate::gfx::backend::NativeCommandList;
use crate::gfx::types::{GpuCommand, QueueType};

#[derive(Default)]
struct Recording {
    commands: Vec<GpuCommand>,
    closed: bool,
}

/// 软件命令列表
pub struct SoftwareCommandList {
    queue_type: QueueType,
    recording: Mutex<Recording>,
}

impl SoftwareCommandList {
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            recording: Mutex::new(Recording::default()),
        }
    }

    /// 已记录命令的快照
    pub fn commands(&self) -> Vec<GpuCommand> {
        self.recording.lock().commands.clone()
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.recording.lock().closed
    }
}

impl NativeCommandList for SoftwareCommandList {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn record(&self, command: GpuCommand) -> Result<()> {
        let mut recording = self.recording.lock();
        if recording.closed {
            return Err(DeviceError::Recording(format!(
                "{} command list is closed",
                self.queue_type
            ))
            .into());
        }
        recording.commands.push(command);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut recording = self.recording.lock();
        if recording.closed {
            return Err(DeviceError::Recording("command list closed twice".to_string()).into());
        }
        recording.closed = true;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut recording = self.recording.lock();
        recording.commands.clear();
        recording.closed = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_close_reset() {
        let list = SoftwareCommandList::new(QueueType::Compute);
        list.record(GpuCommand::Dispatch { x: 1, y: 1, z: 1 }).unwrap();
        list.close().unwrap();
        assert!(list.is_closed());
        assert!(list.record(GpuCommand::Dispatch { x: 2, y: 1, z: 1 }).is_err());
        assert_eq!(list.commands().len(), 1);

        list.reset().unwrap();
        assert!(!list.is_closed());
        assert!(list.commands().is_empty());
    }
}
