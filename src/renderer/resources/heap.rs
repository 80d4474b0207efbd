//! 延迟释放堆与回收堆
//!
//! 资源的最后一个引用被释放时不会立即销毁，而是带着最后一次使用的围栏值进入释放堆。
//! 每帧的垃圾回收用新完成的围栏值扫描释放堆：
//!
//! - 不可复用的对象真正销毁
//! - 可复用的对象按形状哈希移入回收堆，供相同形状的创建请求直接取用
//! - 回收堆中闲置过久的对象按第二条更宽松的水位线驱逐

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::core::error::Result;
use crate::gfx::backend::{NativeDevice, NativeResource};
use crate::gfx::types::{ResourceDesc, ResourceHandle, ResourceStates, ShapeHash};
use crate::renderer::commands::sync::FenceValues;

struct ReleaseEntry {
    object: Arc<dyn NativeResource>,
    shape_hash: ShapeHash,
    /// 可复用时记录对象最后的状态
    recyclable_state: Option<ResourceStates>,
    fences: FenceValues,
}

struct RecycleEntry {
    object: Arc<dyn NativeResource>,
    state: ResourceStates,
    fences: FenceValues,
}

/// 创建或复用得到的提交资源
#[derive(Debug, Clone)]
pub struct CommittedResource {
    pub object: Arc<dyn NativeResource>,
    /// 对象当前所处的状态
    pub state: ResourceStates,
    /// 是否来自回收堆
    pub recycled: bool,
}

/// 一次垃圾回收的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapMovement {
    /// 真正销毁的对象数
    pub freed: usize,
    /// 移入回收堆的对象数
    pub recycled: usize,
    /// 从回收堆驱逐的对象数
    pub evicted: usize,
}

/// 累计统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub releases: usize,
    pub recyclations: usize,
    pub evictions: usize,
    pub reuses: usize,
    pub allocations: usize,
    /// 当前等待释放的对象数
    pub pending_release: usize,
    /// 当前可复用的对象数
    pub recyclable: usize,
}

#[derive(Default)]
struct Counters {
    releases: AtomicUsize,
    recyclations: AtomicUsize,
    evictions: AtomicUsize,
    reuses: AtomicUsize,
    allocations: AtomicUsize,
}

/// 释放堆与回收堆
pub struct ResourceHeaps {
    device: Arc<dyn NativeDevice>,
    release: Mutex<HashMap<ResourceHandle, ReleaseEntry>>,
    recycle: Mutex<HashMap<ShapeHash, VecDeque<RecycleEntry>>>,
    counters: Counters,
}

impl ResourceHeaps {
    pub fn new(device: Arc<dyn NativeDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            release: Mutex::new(HashMap::new()),
            recycle: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    pub fn device(&self) -> &Arc<dyn NativeDevice> {
        &self.device
    }

    /// 把对象放入释放堆，等到 `fences` 全部完成后再处理
    ///
    /// `recyclable_state` 为 `Some` 时对象会进入回收堆而不是销毁。
    pub fn release_later(
        &self,
        object: Arc<dyn NativeResource>,
        recyclable_state: Option<ResourceStates>,
        fences: FenceValues,
    ) {
        let handle = object.handle();
        let shape_hash = object.desc().shape_hash();
        trace!(resource = %handle, ?fences, "Resource queued for release");

        self.release.lock().insert(
            handle,
            ReleaseEntry {
                object,
                shape_hash,
                recyclable_state,
                fences,
            },
        );
        self.counters.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// 每帧的垃圾回收
    ///
    /// 围栏已全部完成的条目被销毁或移入回收堆；
    /// 给出 `prune` 时回收堆中最后使用不晚于该水位线的对象被驱逐。
    pub fn flush_release_heap(&self, completed: &FenceValues, prune: Option<&FenceValues>) -> HeapMovement {
        let mut ready: Vec<ReleaseEntry> = {
            let mut release = self.release.lock();
            let handles: Vec<ResourceHandle> = release
                .iter()
                .filter(|(_, entry)| entry.fences.all_le(completed))
                .map(|(&handle, _)| handle)
                .collect();
            handles.iter().filter_map(|handle| release.remove(handle)).collect()
        };
        // 回收队列头部最新、尾部最旧
        ready.sort_by_key(|entry| (entry.fences.0.iter().copied().max().unwrap_or(0), entry.fences.0));

        let mut movement = HeapMovement::default();
        let mut freed = Vec::new();
        let mut evicted = Vec::new();
        {
            let mut recycle = self.recycle.lock();
            for entry in ready {
                match entry.recyclable_state {
                    Some(state) => {
                        recycle.entry(entry.shape_hash).or_default().push_front(RecycleEntry {
                            object: entry.object,
                            state,
                            fences: entry.fences,
                        });
                        movement.recycled += 1;
                    }
                    None => freed.push(entry.object),
                }
            }

            if let Some(prune) = prune {
                for queue in recycle.values_mut() {
                    while queue.back().map_or(false, |e| e.fences.all_le(prune)) {
                        if let Some(entry) = queue.pop_back() {
                            evicted.push(entry.object);
                        }
                    }
                }
                recycle.retain(|_, queue| !queue.is_empty());
            }
        }

        movement.freed = freed.len();
        movement.evicted = evicted.len();
        self.counters.recyclations.fetch_add(movement.recycled, Ordering::Relaxed);
        self.counters.evictions.fetch_add(movement.evicted, Ordering::Relaxed);

        // 在锁外销毁原生对象
        drop(freed);
        drop(evicted);

        if movement != HeapMovement::default() {
            debug!(
                freed = movement.freed,
                recycled = movement.recycled,
                evicted = movement.evicted,
                "Release heap flushed"
            );
        }
        movement
    }

    /// 先查回收堆，没有相同形状的对象时才向原生分配器申请
    pub fn create_or_reuse_committed_resource(
        &self,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<CommittedResource> {
        let shape_hash = desc.shape_hash();
        let reused = {
            let mut recycle = self.recycle.lock();
            let entry = recycle.get_mut(&shape_hash).and_then(VecDeque::pop_front);
            if recycle.get(&shape_hash).map_or(false, VecDeque::is_empty) {
                recycle.remove(&shape_hash);
            }
            entry
        };

        if let Some(entry) = reused {
            self.counters.reuses.fetch_add(1, Ordering::Relaxed);
            trace!(resource = %entry.object.handle(), shape = shape_hash, "Resource reused from recycle heap");
            return Ok(CommittedResource {
                object: entry.object,
                state: entry.state,
                recycled: true,
            });
        }

        let object = self
            .device
            .create_committed_resource(desc, initial_state)
            .map_err(|e| {
                error!(dimension = ?desc.dimension, width = desc.width, "Failed to create committed resource: {}", e);
                e
            })?;
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);

        Ok(CommittedResource {
            object,
            state: initial_state,
            recycled: false,
        })
    }

    /// 按已有对象的描述创建或复用一个同形状的对象
    pub fn duplicate_committed_resource(
        &self,
        original: &dyn NativeResource,
        initial_state: ResourceStates,
    ) -> Result<CommittedResource> {
        self.create_or_reuse_committed_resource(original.desc(), initial_state)
    }

    pub fn pending_release_count(&self) -> usize {
        self.release.lock().len()
    }

    pub fn recyclable_count(&self) -> usize {
        self.recycle.lock().values().map(VecDeque::len).sum()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            releases: self.counters.releases.load(Ordering::Relaxed),
            recyclations: self.counters.recyclations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            reuses: self.counters.reuses.load(Ordering::Relaxed),
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            pending_release: self.pending_release_count(),
            recyclable: self.recyclable_count(),
        }
    }

    /// 销毁两个堆中的全部对象，调用前 GPU 必须已空闲
    pub fn clear(&self) {
        let release: Vec<ReleaseEntry> = self.release.lock().drain().map(|(_, e)| e).collect();
        let recycle: Vec<VecDeque<RecycleEntry>> = self.recycle.lock().drain().map(|(_, q)| q).collect();
        debug!(
            pending = release.len(),
            recyclable = recycle.iter().map(VecDeque::len).sum::<usize>(),
            "Resource heaps cleared"
        );
    }
}
