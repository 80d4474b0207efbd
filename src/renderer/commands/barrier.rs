//! 待刷新屏障缓冲区
//!
//! 命令列表记录的屏障先进入这里，在下一个绘制、分派、清除、复制或查询解析
//! 之前一次性写入原生命令列表。`Fuse` 模式下同一子资源上的连续转换会被合并：
//!
//! - 新转换的 `after` 覆盖旧转换的 `after`
//! - `BeginOnly` 与随后匹配的 `EndOnly` 合并为完整转换
//! - 合并后 `before == after` 的转换被丢弃
//! - 完全相同的屏障只保留一份
//! - 开启去重时，同一资源的 UAV 屏障只保留一份

use tracing::{trace, warn};

use crate::core::config::BarrierBatching;
use crate::gfx::types::{BarrierSplit, ResourceBarrier};

/// 屏障缓冲区
#[derive(Debug)]
pub struct PendingBarriers {
    mode: BarrierBatching,
    dedupe_uav: bool,
    capacity: usize,
    pending: Vec<ResourceBarrier>,
}

/// 放入缓冲区的结果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BarrierAdmission {
    /// 需要立刻写入原生命令列表的屏障（关闭批处理或缓冲区溢出时）
    pub immediate: Vec<ResourceBarrier>,
    /// 屏障槽位的净变化，计入命令列表的命令数
    ///
    /// 合并掉此前缓冲的转换时为负。
    pub recorded: isize,
}

impl PendingBarriers {
    pub fn new(mode: BarrierBatching, dedupe_uav: bool, capacity: usize) -> Self {
        Self {
            mode,
            dedupe_uav,
            capacity: capacity.max(1),
            pending: Vec::with_capacity(capacity.max(1)),
        }
    }

    pub fn mode(&self) -> BarrierBatching {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 当前缓冲的屏障
    pub fn pending(&self) -> &[ResourceBarrier] {
        &self.pending
    }

    /// 放入一批屏障
    pub fn push(&mut self, barriers: &[ResourceBarrier]) -> BarrierAdmission {
        if barriers.is_empty() {
            return BarrierAdmission::default();
        }

        match self.mode {
            BarrierBatching::Off => BarrierAdmission {
                immediate: barriers.to_vec(),
                recorded: 1,
            },
            _ if barriers.len() > self.capacity => {
                // 单批就超出容量，连同已缓冲的一起立即写入
                trace!(pending = self.pending.len(), incoming = barriers.len(), "Barrier batch exceeds capacity");
                let mut immediate = std::mem::take(&mut self.pending);
                immediate.extend_from_slice(barriers);
                BarrierAdmission { immediate, recorded: barriers.len() as isize }
            }
            BarrierBatching::Batch => {
                let immediate = self.make_room(barriers.len());
                self.pending.extend_from_slice(barriers);
                BarrierAdmission { immediate, recorded: barriers.len() as isize }
            }
            BarrierBatching::Fuse => {
                let immediate = self.make_room(barriers.len());
                let recorded = barriers.iter().map(|barrier| self.fuse(barrier)).sum();
                BarrierAdmission { immediate, recorded }
            }
        }
    }

    /// 取出全部待刷新屏障
    pub fn take(&mut self) -> Option<Vec<ResourceBarrier>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// 丢弃全部待刷新屏障
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn make_room(&mut self, incoming: usize) -> Vec<ResourceBarrier> {
        if self.pending.len() + incoming > self.capacity {
            trace!(pending = self.pending.len(), incoming, "Barrier buffer full, flushing");
            std::mem::take(&mut self.pending)
        } else {
            Vec::new()
        }
    }

    /// 合并一条屏障，返回槽位变化：追加为 1，并入已有槽位为 0，抵消已有槽位为 -1
    fn fuse(&mut self, barrier: &ResourceBarrier) -> isize {
        match *barrier {
            ResourceBarrier::Uav { resource } => {
                if self.dedupe_uav
                    && self
                        .pending
                        .iter()
                        .any(|p| matches!(p, ResourceBarrier::Uav { resource: r } if *r == resource))
                {
                    return 0;
                }
                self.pending.push(*barrier);
                1
            }
            ResourceBarrier::Transition { resource, subresource, before, after, split } => {
                if split == BarrierSplit::None && before == after {
                    return 0;
                }

                let mut merged = None;
                for (index, pending) in self.pending.iter_mut().enumerate() {
                    let ResourceBarrier::Transition {
                        resource: p_resource,
                        subresource: p_subresource,
                        before: p_before,
                        after: p_after,
                        split: p_split,
                    } = pending
                    else {
                        continue;
                    };

                    if *p_resource != resource || *p_subresource != subresource {
                        continue;
                    }

                    if *p_before == before && *p_after == after && *p_split == split {
                        merged = Some((index, false));
                        break;
                    }

                    if *p_split == BarrierSplit::None && split == BarrierSplit::None {
                        if *p_after != before {
                            warn!(
                                resource = %resource,
                                subresource,
                                pending_after = ?p_after,
                                before = ?before,
                                "Fused transition does not chain"
                            );
                        }
                        *p_after = after;
                        merged = Some((index, true));
                        break;
                    }

                    if *p_split == BarrierSplit::BeginOnly
                        && split == BarrierSplit::EndOnly
                        && *p_before == before
                        && *p_after == after
                    {
                        *p_split = BarrierSplit::None;
                        merged = Some((index, true));
                        break;
                    }
                }

                match merged {
                    None => {
                        self.pending.push(*barrier);
                        1
                    }
                    Some((index, true)) => {
                        let fused = self.pending[index];
                        match fused {
                            ResourceBarrier::Transition { before, after, split: BarrierSplit::None, .. }
                                if before == after =>
                            {
                                self.pending.remove(index);
                                -1
                            }
                            _ => 0,
                        }
                    }
                    Some((_, false)) => 0,
                }
            }
            ResourceBarrier::Aliasing { .. } => {
                self.pending.push(*barrier);
                1
            }
        }
    }
}
