//! 交换设备的 Mock 实现
//!
//! 以内存中的槽位数组模拟交换分区，并统计换入换出次数。

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::SpinLock;

/// Mock 交换设备
pub struct MockSwap {
    slots: SpinLock<Vec<Option<Vec<u8>>>>,
    swap_outs: AtomicUsize,
    swap_ins: AtomicUsize,
}

impl MockSwap {
    /// 创建具有 `capacity` 个槽位的交换设备
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SpinLock::new(vec![None; capacity]),
            swap_outs: AtomicUsize::new(0),
            swap_ins: AtomicUsize::new(0),
        }
    }

    /// 写入一个空闲槽位，已满时返回 `None`
    pub fn write_slot(&self, page: &[u8]) -> Option<usize> {
        let mut slots = self.slots.lock();
        let slot = slots.iter().position(Option::is_none)?;
        slots[slot] = Some(page.to_vec());
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
        Some(slot)
    }

    /// 读出槽位内容并释放槽位
    ///
    /// # Panics
    /// 槽位为空时 panic（重复换入）。
    pub fn read_slot(&self, slot: usize, page: &mut [u8]) {
        let data = self.slots.lock()[slot]
            .take()
            .unwrap_or_else(|| panic!("swap slot {} is empty", slot));
        page.copy_from_slice(&data);
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
    }

    /// 丢弃槽位
    ///
    /// # Panics
    /// 槽位为空时 panic。
    pub fn free_slot(&self, slot: usize) {
        let old = self.slots.lock()[slot].take();
        assert!(old.is_some(), "swap slot {} is empty", slot);
    }

    /// 当前被占用的槽位数
    pub fn used_slots(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// 累计换出次数
    pub fn swap_outs(&self) -> usize {
        self.swap_outs.load(Ordering::Relaxed)
    }

    /// 累计换入次数
    pub fn swap_ins(&self) -> usize {
        self.swap_ins.load(Ordering::Relaxed)
    }
}
