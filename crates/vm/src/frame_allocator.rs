//! 帧池模块
//!
//! 本模块管理所有可供用户进程使用的物理帧：分配、固定（pin）、释放，
//! 并在帧耗尽时挑选并驱逐牺牲帧。
//!
//! ## 数据布局（arena + 下标）
//!
//! - 帧池覆盖一段连续的物理页 `[start, end)`，每个帧以 [`FrameId`]（槽位下标）标识，
//!   物理页号为 `start + id`。
//! - 每个帧记录其所有者 `(Weak<补充页表>, Vpn)`；页描述符只记录 [`FrameId`]。
//!   双向查找均为 O(1)，且不形成引用环。
//! - 固定标志是帧池锁之外的原子量，解除固定无需获取帧池锁。
//!
//! ## 置换策略（时钟 / 第二次机会）
//!
//! 时钟指针按槽位顺序循环扫描：
//!
//! 1. 跳过空闲帧与被固定的帧；
//! 2. 若所属页的访问位被置位，清除访问位并继续（给予第二次机会）；
//! 3. 否则选中该帧，由其所属页描述符先持久化内容，再把帧交给新的所有者。
//!
//! 连续两圈扫描都找不到未固定的已用帧时，说明帧已耗尽，直接 panic。
//!
//! ## 加锁顺序
//!
//! 帧池锁 → 补充页表锁（包括被驱逐的其他进程的补充页表）→ 文件系统锁。
//! 持有补充页表锁的线程不得再获取帧池锁。

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use sync::{SpinLock, SpinLockGuard};

use crate::address::{Paddr, PageNum, Ppn, UsizeConvert, Vpn};
use crate::arch_ops::arch_ops;
use crate::config::PAGE_SIZE;
use crate::page::{EvictOutcome, SupplementalPageTable};
use crate::page_table::PageDirectory;
use crate::swap::SwapDevice;

/// 帧在帧池中的槽位下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// 槽位下标
    pub fn index(self) -> usize {
        self.0
    }
}

/// 帧池的统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// 总帧数
    pub total: usize,
    /// 空闲帧数
    pub free: usize,
    /// 被固定的帧数
    pub pinned: usize,
}

/// 帧的所有者：哪个地址空间的哪个虚拟页
struct FrameOwner<D: PageDirectory> {
    spt: Weak<SupplementalPageTable<D>>,
    vpn: Vpn,
}

struct FrameEntry<D: PageDirectory> {
    in_use: bool,
    owner: Option<FrameOwner<D>>,
}

/// 受帧池锁保护的状态
pub(crate) struct PoolInner<D: PageDirectory> {
    frames: Vec<FrameEntry<D>>,
    /// 空闲帧栈
    free: Vec<FrameId>,
    /// 时钟指针
    hand: usize,
}

/// 全局物理帧池
///
/// 内核启动时创建一次，以 `Arc` 交给每个地址空间，生命周期与内核相同。
pub struct FramePool<D: PageDirectory> {
    start: Ppn,
    inner: SpinLock<PoolInner<D>>,
    pinned: Box<[AtomicBool]>,
    swap: Arc<dyn SwapDevice>,
}

impl<D: PageDirectory> FramePool<D> {
    /// 以物理内存范围 `[start_addr, end_addr)` 创建帧池。
    ///
    /// 起始地址向上取整、结束地址向下取整到页边界。
    pub fn new(start_addr: usize, end_addr: usize, swap: Arc<dyn SwapDevice>) -> Self {
        let start = Ppn::from_addr_ceil(Paddr::from_usize(start_addr));
        let end = Ppn::from_addr_floor(Paddr::from_usize(end_addr));
        let total = end.as_usize().saturating_sub(start.as_usize());

        let frames = (0..total)
            .map(|_| FrameEntry {
                in_use: false,
                owner: None,
            })
            .collect();
        // 逆序入栈，使低地址的帧先被分配
        let free = (0..total).rev().map(FrameId).collect();
        let pinned = (0..total).map(|_| AtomicBool::new(false)).collect();

        log::info!(
            "vm: frame pool with {} frames at [{:#x}, {:#x})",
            total,
            start.start_addr().as_usize(),
            start.offset(total).start_addr().as_usize()
        );

        FramePool {
            start,
            inner: SpinLock::new(PoolInner {
                frames,
                free,
                hand: 0,
            }),
            pinned,
            swap,
        }
    }

    /// 为 `spt` 中的虚拟页 `vpn` 分配一个帧。
    ///
    /// 有空闲帧时直接返回；否则按时钟算法选出牺牲帧，在本次调用内完成驱逐后返回。
    /// 调用者不得持有任何补充页表锁。
    ///
    /// # Panics
    /// 没有空闲帧且没有可驱逐（未固定）的帧时 panic。
    pub fn allocate(&self, spt: &Arc<SupplementalPageTable<D>>, vpn: Vpn, pinned: bool) -> FrameId {
        // 驱逐过程中升级得到的地址空间引用，必须在释放帧池锁之后才 drop：
        // 若它恰好是最后一个强引用，drop 会触发地址空间销毁，而销毁需要帧池锁。
        let mut keep_alive = Vec::new();

        let id = loop {
            let mut inner = self.inner.lock();
            let victim = match inner.free.pop() {
                Some(id) => Some(id),
                None => self.evict(&mut inner, &mut keep_alive),
            };
            if let Some(id) = victim {
                let entry = &mut inner.frames[id.0];
                debug_assert!(entry.owner.is_none());
                entry.in_use = true;
                entry.owner = Some(FrameOwner {
                    spt: Arc::downgrade(spt),
                    vpn,
                });
                self.pinned[id.0].store(pinned, Ordering::Release);
                break id;
            }
            // 只剩正在销毁的地址空间持有的帧，等待它们被归还
            drop(inner);
            keep_alive.clear();
            core::hint::spin_loop();
        };
        drop(keep_alive);

        log::trace!("vm: frame {} -> vpn {:#x}", id.0, vpn.as_usize());
        id
    }

    /// 时钟扫描，驱逐并返回一个牺牲帧（所有者已清除）。
    ///
    /// 所有候选帧都属于正在销毁的地址空间时返回 `None`。
    fn evict(
        &self,
        inner: &mut PoolInner<D>,
        keep_alive: &mut Vec<Arc<SupplementalPageTable<D>>>,
    ) -> Option<FrameId> {
        let total = inner.frames.len();
        if total == 0 {
            log::error!("vm: frame pool is empty");
            panic!("vm: no frame to evict");
        }

        let mut steps = 0;
        let mut candidates = 0;
        let mut dying = 0;
        let mut empty_sweeps = 0;

        loop {
            if steps == total {
                if candidates == 0 {
                    if dying > 0 {
                        return None;
                    }
                    // 固定标志不受帧池锁保护，多给一圈的机会
                    empty_sweeps += 1;
                    if empty_sweeps == 2 {
                        log::error!("vm: no free frame and all {} frames are pinned", total);
                        panic!("vm: no frame to evict");
                    }
                } else {
                    empty_sweeps = 0;
                }
                steps = 0;
                candidates = 0;
                dying = 0;
            }
            steps += 1;

            let id = FrameId(inner.hand);
            inner.hand = (inner.hand + 1) % total;

            if self.is_pinned(id) {
                continue;
            }
            let Some(owner) = inner.frames[id.0].owner.as_ref() else {
                continue;
            };
            let vpn = owner.vpn;
            // 升级失败说明所属地址空间正在销毁，它的帧马上会被释放
            let Some(spt) = owner.spt.upgrade() else {
                dying += 1;
                continue;
            };
            candidates += 1;

            let outcome = spt.try_evict(vpn, id, self);
            keep_alive.push(spt);
            match outcome {
                EvictOutcome::Evicted => {
                    inner.frames[id.0].owner = None;
                    log::debug!("vm: evicted vpn {:#x} from frame {}", vpn.as_usize(), id.0);
                    return Some(id);
                }
                EvictOutcome::Referenced | EvictOutcome::Pinned => {}
            }
        }
    }

    /// 将帧归还空闲池。调用者必须已经清除引用该帧的页表项。
    ///
    /// # Panics
    /// 重复释放时 panic。
    pub fn free(&self, id: FrameId) {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner, id);
    }

    /// 在已持有帧池锁的情况下释放帧
    pub(crate) fn release_locked(&self, inner: &mut PoolInner<D>, id: FrameId) {
        let entry = &mut inner.frames[id.0];
        if !entry.in_use {
            log::error!("vm: double free of frame {}", id.0);
            panic!("vm: double free of frame");
        }
        entry.in_use = false;
        entry.owner = None;
        self.pinned[id.0].store(false, Ordering::Release);
        inner.free.push(id);
    }

    /// 获取帧池锁
    pub(crate) fn lock(&self) -> SpinLockGuard<'_, PoolInner<D>> {
        self.inner.lock()
    }

    /// 固定帧，使其不会被选为牺牲帧
    pub fn pin(&self, id: FrameId) {
        self.pinned[id.0].store(true, Ordering::Release);
    }

    /// 解除固定
    pub fn unpin(&self, id: FrameId) {
        self.pinned[id.0].store(false, Ordering::Release);
    }

    /// 帧是否被固定
    pub fn is_pinned(&self, id: FrameId) -> bool {
        self.pinned[id.0].load(Ordering::Acquire)
    }

    /// 帧的物理页号
    pub fn ppn(&self, id: FrameId) -> Ppn {
        self.start.offset(id.0)
    }

    /// 帧当前是否属于 `spt` 的虚拟页 `vpn`
    pub fn is_owned_by(&self, id: FrameId, spt: &Arc<SupplementalPageTable<D>>, vpn: Vpn) -> bool {
        let inner = self.inner.lock();
        inner.frames[id.0]
            .owner
            .as_ref()
            .is_some_and(|owner| owner.vpn == vpn && owner.spt.as_ptr() == Arc::as_ptr(spt))
    }

    /// 获取帧池的统计信息
    pub fn stats(&self) -> FrameStats {
        let inner = self.inner.lock();
        FrameStats {
            total: inner.frames.len(),
            free: inner.free.len(),
            pinned: self
                .pinned
                .iter()
                .filter(|p| p.load(Ordering::Relaxed))
                .count(),
        }
    }

    /// 交换设备
    pub fn swap(&self) -> &dyn SwapDevice {
        self.swap.as_ref()
    }

    /// 通过内核直接映射区访问帧的内容
    ///
    /// # Safety
    /// 调用者必须保证在返回的切片存活期间没有其他线程访问同一帧：
    /// 帧被固定，或调用者持有该帧所属补充页表的锁。
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn frame_bytes(&self, id: FrameId) -> &mut [u8] {
        let paddr = self.ppn(id).start_addr().as_usize();
        let vaddr = arch_ops().paddr_to_vaddr(paddr);
        // SAFETY: 帧位于帧池管理的物理内存内，直接映射区覆盖整个物理内存
        unsafe { core::slice::from_raw_parts_mut(vaddr as *mut u8, PAGE_SIZE) }
    }
}
