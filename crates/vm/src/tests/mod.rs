// vm 的单元测试。
//
// test-support 不依赖 vm，这里为其中的 Mock 类型实现 vm 的 trait，
// 并提供各测试共用的夹具与不变量检查。

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use std::sync::Once;

use test_support::mock::fs::{MockFdTable, MockFile};
use test_support::mock::mm::{
    alloc_phys_memory, MockArchOps, MockPageDir, MockPte, MockVmConfig, MOCK_ARCH_OPS,
    MOCK_VM_CONFIG,
};
use test_support::mock::swap::MockSwap;

use crate::address::{PageNum, Ppn, UsizeConvert, Vaddr, Vpn};
use crate::arch_ops::{ArchVmOps, register_arch_ops};
use crate::config::{VmConfig, register_config};
use crate::fault::resolve_fault;
use crate::file::{FdLookup, MmFile};
use crate::frame_allocator::FramePool;
use crate::memory_space::AddressSpace;
use crate::page::{PageKind, SupplementalPageTable};
use crate::page_table::{PageDirectory, PagingError, PagingResult, UniversalPTEFlag};
use crate::swap::{SwapDevice, SwapSlot};

mod fault;

impl PageDirectory for MockPageDir {
    fn new() -> Self {
        MockPageDir::new()
    }

    fn map(&mut self, vpn: Vpn, ppn: Ppn, flags: UniversalPTEFlag) -> PagingResult<()> {
        if !flags.contains(UniversalPTEFlag::VALID) {
            return Err(PagingError::InvalidFlags);
        }
        let pte = MockPte {
            ppn: ppn.as_usize(),
            flags: flags.bits(),
        };
        if MockPageDir::map(self, vpn.as_usize(), pte) {
            Ok(())
        } else {
            Err(PagingError::AlreadyMapped)
        }
    }

    fn unmap(&mut self, vpn: Vpn) -> PagingResult<UniversalPTEFlag> {
        let pte = MockPageDir::unmap(self, vpn.as_usize()).ok_or(PagingError::NotMapped)?;
        let mut flags = UniversalPTEFlag::from_bits_truncate(pte.flags);
        // 模拟另一个 CPU 在映射清除前一刻经由旧 TLB 条目写入
        if is_late_write_page(vpn) {
            flags |= UniversalPTEFlag::DIRTY;
        }
        Ok(flags)
    }

    fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)> {
        self.entry(vpn.as_usize())
            .map(|pte| (Ppn(pte.ppn), UniversalPTEFlag::from_bits_truncate(pte.flags)))
            .ok_or(PagingError::NotMapped)
    }

    fn set_dirty(&mut self, vpn: Vpn, dirty: bool) {
        set_flag(self, vpn, UniversalPTEFlag::DIRTY, dirty);
    }

    fn is_accessed(&self, vpn: Vpn) -> bool {
        has_flag(self, vpn, UniversalPTEFlag::ACCESSED)
    }

    fn set_accessed(&mut self, vpn: Vpn, accessed: bool) {
        set_flag(self, vpn, UniversalPTEFlag::ACCESSED, accessed);
    }

    fn activate(&self) {
        MockPageDir::activate(self);
    }

    fn deactivate(&self) {
        MockPageDir::deactivate(self);
    }
}

fn has_flag(dir: &MockPageDir, vpn: Vpn, flag: UniversalPTEFlag) -> bool {
    dir.entry(vpn.as_usize())
        .is_some_and(|pte| UniversalPTEFlag::from_bits_truncate(pte.flags).contains(flag))
}

fn set_flag(dir: &mut MockPageDir, vpn: Vpn, flag: UniversalPTEFlag, on: bool) {
    if let Some(pte) = dir.entry_mut(vpn.as_usize()) {
        let mut flags = UniversalPTEFlag::from_bits_truncate(pte.flags);
        flags.set(flag, on);
        pte.flags = flags.bits();
    }
}

impl ArchVmOps for MockArchOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        MockArchOps::paddr_to_vaddr(self, paddr)
    }
}

impl VmConfig for MockVmConfig {
    fn user_space_start(&self) -> usize {
        MockVmConfig::user_space_start(self)
    }

    fn user_space_end(&self) -> usize {
        MockVmConfig::user_space_end(self)
    }

    fn stack_limit(&self) -> usize {
        MockVmConfig::stack_limit(self)
    }

    fn stack_slack(&self) -> usize {
        MockVmConfig::stack_slack(self)
    }
}

impl SwapDevice for MockSwap {
    fn swap_out(&self, page: &[u8]) -> Option<SwapSlot> {
        self.write_slot(page).map(SwapSlot)
    }

    fn swap_in(&self, slot: SwapSlot, page: &mut [u8]) {
        self.read_slot(slot.0, page);
    }

    fn swap_drop(&self, slot: SwapSlot) {
        self.free_slot(slot.0);
    }
}

impl MmFile for MockFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        self.read_bytes(offset, buf).ok_or(-5)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        Ok(self.write_bytes(offset, buf))
    }

    fn length(&self) -> usize {
        self.len()
    }

    fn reopen(&self) -> Result<Arc<dyn MmFile>, isize> {
        Ok(Arc::new(self.reopen_handle()))
    }
}

impl FdLookup for MockFdTable {
    fn get_file(&self, fd: i32) -> Option<Arc<dyn MmFile>> {
        self.get(fd).map(|file| file as Arc<dyn MmFile>)
    }
}

type Pool = FramePool<MockPageDir>;
type Spt = SupplementalPageTable<MockPageDir>;
type Space = AddressSpace<MockPageDir>;

/// 普通数据页所在的用户地址
const BASE: usize = 0x1000_0000;

/// 不触发栈增长的用户栈指针
const USER_SP: usize = 0xBFFF_F000;

/// 此区域内的页在清除映射时总被报告为脏（见 `MockPageDir` 的 `unmap`）
const LATE_WRITE_BASE: usize = 0x2000_0000;
const LATE_WRITE_END: usize = 0x2010_0000;

fn is_late_write_page(vpn: Vpn) -> bool {
    (LATE_WRITE_BASE..LATE_WRITE_END).contains(&vpn.start_addr().as_usize())
}

/// 延迟写入区域中的第 `i` 个虚拟页
fn late_vpn(i: usize) -> Vpn {
    Vpn::from_addr_floor(Vaddr::from_usize(LATE_WRITE_BASE)).offset(i)
}

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        // SAFETY: Once 保证只注册一次
        unsafe {
            register_config(&MOCK_VM_CONFIG);
            register_arch_ops(&MOCK_ARCH_OPS);
        }
    });
}

struct Env {
    pool: Arc<Pool>,
    swap: Arc<MockSwap>,
}

impl Env {
    fn new(frames: usize, swap_slots: usize) -> Self {
        init();
        let (start, end) = alloc_phys_memory(frames);
        let swap = Arc::new(MockSwap::new(swap_slots));
        let pool = Arc::new(FramePool::new(start, end, swap.clone() as Arc<dyn SwapDevice>));
        Env { pool, swap }
    }

    fn spt(&self) -> Arc<Spt> {
        SupplementalPageTable::new(self.pool.clone())
    }

    fn space(&self) -> Space {
        AddressSpace::new(self.pool.clone())
    }

    fn free_frames(&self) -> usize {
        self.pool.stats().free
    }
}

/// `BASE` 之后的第 `i` 个虚拟页
fn vpn(i: usize) -> Vpn {
    Vpn::from_addr_floor(Vaddr::from_usize(BASE)).offset(i)
}

/// 第 `i` 个虚拟页的起始地址
fn page_addr(i: usize) -> usize {
    vpn(i).start_addr().as_usize()
}

/// 检查帧池与若干补充页表之间的一致性：
/// 驻留页与帧一一对应且互相指向，页目录只映射驻留页，未驻留的交换页持有槽位。
fn check_invariants(pool: &Pool, spts: &[&Arc<Spt>]) {
    let mut frames = BTreeSet::new();
    for spt in spts {
        for info in spt.pages() {
            match info.frame {
                Some(frame) => {
                    assert!(frames.insert(frame), "frame {:?} attached twice", frame);
                    assert!(pool.is_owned_by(frame, spt, info.vpn));
                    let (ppn, flags) = spt.walk(info.vpn).expect("resident page not mapped");
                    assert_eq!(ppn, pool.ppn(frame));
                    assert_eq!(flags.contains(UniversalPTEFlag::WRITEABLE), info.writable);
                    assert!(info.swap_slot.is_none());
                }
                None => {
                    assert!(spt.walk(info.vpn).is_err());
                    if info.kind == PageKind::Swapped {
                        assert!(info.swap_slot.is_some());
                    }
                }
            }
        }
    }
    let stats = pool.stats();
    assert!(frames.len() <= stats.total - stats.free);
}
