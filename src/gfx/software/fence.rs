//! 软件围栏
//!
//! 用互斥锁与条件变量模拟硬件围栏：GPU 时间线线程写入，任意线程等待。

use parking_lot::{Condvar, Mutex};
use std::any::Any;

use crate::gfx::backend::NativeFence;

/// 软件围栏
pub struct SoftwareFence {
    id: u64,
    value: Mutex<u64>,
    reached: Condvar,
}

impl SoftwareFence {
    pub fn new(id: u64, initial_value: u64) -> Self {
        Self {
            id,
            value: Mutex::new(initial_value),
            reached: Condvar::new(),
        }
    }

    /// 围栏编号
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl NativeFence for SoftwareFence {
    fn completed_value(&self) -> u64 {
        *self.value.lock()
    }

    fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        // 硬件围栏允许回退，这里保持单调以简化测试中的断言
        if value > *current {
            *current = value;
        }
        self.reached.notify_all();
    }

    fn wait_on_cpu(&self, value: u64) {
        let mut current = self.value.lock();
        while *current < value {
            self.reached.wait(&mut current);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
