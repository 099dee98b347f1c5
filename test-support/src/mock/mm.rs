//! 内存管理相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `vm` crate（避免循环依赖）。
//! `vm` crate 在 `cfg(test)` 下为这些类型实现其 trait（例如 `PageDirectory` / `VmConfig`）。

use alloc::alloc::{alloc_zeroed, Layout};
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicBool, Ordering};

/// 页大小
pub const MOCK_PAGE_SIZE: usize = 4096;

/// Mock 页表项，`flags` 的位定义由使用者决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPte {
    /// 物理页号
    pub ppn: usize,
    /// 标志位
    pub flags: usize,
}

/// Mock 的页目录：虚拟页号 → 页表项
#[derive(Debug, Default)]
pub struct MockPageDir {
    entries: BTreeMap<usize, MockPte>,
    active: AtomicBool,
}

impl MockPageDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装页表项，已存在时返回 `false`
    pub fn map(&mut self, vpn: usize, pte: MockPte) -> bool {
        if self.entries.contains_key(&vpn) {
            return false;
        }
        self.entries.insert(vpn, pte);
        true
    }

    /// 清除页表项，返回被清除的页表项
    pub fn unmap(&mut self, vpn: usize) -> Option<MockPte> {
        self.entries.remove(&vpn)
    }

    pub fn entry(&self, vpn: usize) -> Option<MockPte> {
        self.entries.get(&vpn).copied()
    }

    pub fn entry_mut(&mut self, vpn: usize) -> Option<&mut MockPte> {
        self.entries.get_mut(&vpn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Mock 的架构操作
///
/// 测试中物理内存来自宿主堆，采用“恒等映射”（vaddr == paddr）。
pub struct MockArchOps;

impl MockArchOps {
    pub const fn new() -> Self {
        Self
    }

    /// 将物理地址转换为虚拟地址（测试默认：恒等映射）
    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();

/// Mock 的虚拟内存布局配置
pub struct MockVmConfig;

impl MockVmConfig {
    pub const fn new() -> Self {
        Self
    }

    pub fn user_space_start(&self) -> usize {
        0x1000
    }

    pub fn user_space_end(&self) -> usize {
        0xC000_0000
    }

    pub fn stack_limit(&self) -> usize {
        8 * 1024 * 1024
    }

    pub fn stack_slack(&self) -> usize {
        32
    }
}

/// 全局 Mock 实例
pub static MOCK_VM_CONFIG: MockVmConfig = MockVmConfig::new();

/// 从宿主堆分配 `frames` 个页对齐、清零的页作为“物理内存”，返回 `[start, end)`。
///
/// 内存被有意泄漏，以保证在整个测试进程中有效。
pub fn alloc_phys_memory(frames: usize) -> (usize, usize) {
    assert!(frames > 0);
    let size = frames * MOCK_PAGE_SIZE;
    let layout = Layout::from_size_align(size, MOCK_PAGE_SIZE).expect("bad layout");
    // SAFETY: layout 大小非零
    let ptr = unsafe { alloc_zeroed(layout) };
    assert!(!ptr.is_null(), "out of host memory");
    let start = ptr as usize;
    (start, start + size)
}
