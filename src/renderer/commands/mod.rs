//! 命令提交与同步模块
//!
//! 自底向上：
//! - `sync`：每个队列类别的围栏计数与依赖围栏表
//! - `barrier`：待刷新屏障的批处理与合并
//! - `command`：命令列表及其生命周期状态机
//! - `queue`：每个队列一个提交线程的异步提交队列
//! - `pool`：按注册顺序提交的命令列表池
//! - `scheduler`：每帧的提交、节流与垃圾回收

pub mod barrier;
pub mod command;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod sync;

// 重新导出常用类型
pub use barrier::{BarrierAdmission, PendingBarriers};
pub use command::{CommandList, CommandListHandle, ListState, ListStats, ListStatus};
pub use pool::{CommandListPool, PoolStats};
pub use queue::{AsyncCommandQueue, SubmissionTask};
pub use scheduler::{CallbackId, CommandScheduler, QueueCallback, QueueEvent, FRAME_FENCES};
pub use sync::{AccessKind, DependencySet, FenceSet, FenceValues};
