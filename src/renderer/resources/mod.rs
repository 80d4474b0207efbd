//! GPU 资源模块
//!
//! - `resource`：资源的状态转换、拆分屏障与访问围栏跟踪
//! - `heap`：延迟释放堆与按形状复用的回收堆

pub mod heap;
pub mod resource;

pub use heap::{CommittedResource, HeapMovement, HeapStats, ResourceHeaps};
pub use resource::{Resource, ResourceView};
