//! 补充页表模块
//!
//! 每个用户地址空间拥有一张补充页表：虚拟页号 → 页描述符，
//! 以及该地址空间的页目录。两者由同一把自旋锁保护。
//!
//! # 页描述符
//!
//! 页描述符记录一个虚拟页的内容从何而来：
//!
//! - [`PageBacking::Zero`] - 首次访问时填零
//! - [`PageBacking::File`] - 来自文件的一段（不超过一页），可选写回
//! - [`PageBacking::Swapped`] - 内容位于交换区
//!
//! 页是否驻留由 `frame: Option<FrameId>` 直接表达：驻留 ⇔ 恰好挂接一个帧。
//! 未驻留时，后备信息必须足以完整重建页内容。
//!
//! # 状态转移
//!
//! ```text
//! 未登记 --declare--> 已登记未驻留 --缺页--> 驻留 --驱逐--> 已登记未驻留
//!                                     |
//!                                     +--remove--> 未登记
//! ```
//!
//! 驱逐时的持久化规则：
//!
//! | 类型    | 脏且写回 | 脏且不写回 | 干净     |
//! |---------|----------|------------|----------|
//! | File    | 写回文件 | 换出       | 不做处理 |
//! | Zero    | -        | 换出       | 不做处理 |
//! | Swapped | 换出     | 换出       | 换出     |
//!
//! 换出后页的类型变为 Swapped。干净的文件页永远不会进入交换区。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;

use crate::address::{PageNum, Ppn, UsizeConvert, Vpn};
use crate::config::{PAGE_SIZE, in_stack, in_user_space};
use crate::error::{VmError, VmResult};
use crate::file::{MmFile, with_filesys_lock};
use crate::frame_allocator::{FrameId, FramePool, PoolInner};
use crate::page_table::{PageDirectory, PagingError, PagingResult, UniversalPTEFlag};
use crate::swap::SwapSlot;

/// 文件后备信息
#[derive(Clone)]
pub struct FileBacking {
    /// 打开的文件
    pub file: Arc<dyn MmFile>,
    /// 文件内的字节偏移
    pub offset: usize,
    /// 从文件读取的字节数，不超过一页，其余部分填零
    pub length: usize,
    /// 脏页是否写回文件
    pub write_back: bool,
}

impl core::fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileBacking")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("write_back", &self.write_back)
            .finish()
    }
}

/// 页内容的后备来源
#[derive(Debug, Clone)]
pub enum PageBacking {
    /// 填零页
    Zero,
    /// 文件页
    File(FileBacking),
    /// 交换页。未驻留时持有槽位；换入后槽位即被释放
    Swapped(Option<SwapSlot>),
}

/// 页类型快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// 填零页
    Zero,
    /// 文件页
    File {
        /// 文件内的字节偏移
        offset: usize,
        /// 从文件读取的字节数
        length: usize,
        /// 脏页是否写回
        write_back: bool,
    },
    /// 交换页
    Swapped,
}

/// 页描述符的只读快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// 虚拟页号
    pub vpn: Vpn,
    /// 页类型
    pub kind: PageKind,
    /// 是否可写
    pub writable: bool,
    /// 驻留时挂接的帧
    pub frame: Option<FrameId>,
    /// 未驻留的交换页所在槽位
    pub swap_slot: Option<SwapSlot>,
}

impl PageInfo {
    /// 页是否驻留
    pub fn is_present(&self) -> bool {
        self.frame.is_some()
    }
}

struct PageDescriptor {
    vpn: Vpn,
    writable: bool,
    backing: PageBacking,
    frame: Option<FrameId>,
}

impl PageDescriptor {
    fn info(&self) -> PageInfo {
        let (kind, swap_slot) = match &self.backing {
            PageBacking::Zero => (PageKind::Zero, None),
            PageBacking::File(fb) => (
                PageKind::File {
                    offset: fb.offset,
                    length: fb.length,
                    write_back: fb.write_back,
                },
                None,
            ),
            PageBacking::Swapped(slot) => (PageKind::Swapped, *slot),
        };
        PageInfo {
            vpn: self.vpn,
            kind,
            writable: self.writable,
            frame: self.frame,
            swap_slot,
        }
    }
}

struct SptState<D: PageDirectory> {
    pages: BTreeMap<Vpn, PageDescriptor>,
    /// 销毁后为 `None`
    page_dir: Option<D>,
}

/// 驱逐尝试的结果
pub(crate) enum EvictOutcome {
    /// 已持久化并解除映射，帧可以交给新的所有者
    Evicted,
    /// 访问位被置位，已清除，给予第二次机会
    Referenced,
    /// 帧在获取补充页表锁之前被固定
    Pinned,
}

/// 缺页装载的结果
pub(crate) enum LoadOutcome {
    /// 已装载并挂接帧
    Loaded,
    /// 期间其他线程已经装载了该页
    AlreadyPresent,
    /// 期间该页被移除
    Vanished,
    /// 读取后备内容失败
    Failed(VmError),
}

/// 补充页表
pub struct SupplementalPageTable<D: PageDirectory> {
    pool: Arc<FramePool<D>>,
    state: SpinLock<SptState<D>>,
}

impl<D: PageDirectory> SupplementalPageTable<D> {
    /// 创建空的补充页表及其页目录
    pub fn new(pool: Arc<FramePool<D>>) -> Arc<Self> {
        Arc::new(SupplementalPageTable {
            pool,
            state: SpinLock::new(SptState {
                pages: BTreeMap::new(),
                page_dir: Some(D::new()),
            }),
        })
    }

    /// 所使用的帧池
    pub fn pool(&self) -> &Arc<FramePool<D>> {
        &self.pool
    }

    /// 登记一个填零页
    pub fn declare_zero(&self, vpn: Vpn, writable: bool) -> VmResult<()> {
        self.declare(vpn, writable, PageBacking::Zero)
    }

    /// 登记一个文件页
    ///
    /// # Errors
    /// `backing.length` 超过页大小时返回 [`VmError::InvalidArgument`]。
    pub fn declare_file(&self, vpn: Vpn, backing: FileBacking, writable: bool) -> VmResult<()> {
        if backing.length > PAGE_SIZE {
            return Err(VmError::InvalidArgument);
        }
        self.declare(vpn, writable, PageBacking::File(backing))
    }

    fn declare(&self, vpn: Vpn, writable: bool, backing: PageBacking) -> VmResult<()> {
        if !in_user_space(vpn.start_addr().as_usize()) {
            return Err(VmError::InvalidAddress);
        }
        let mut state = self.state.lock();
        if state.page_dir.is_none() {
            return Err(VmError::InvalidAddress);
        }
        if state.pages.contains_key(&vpn) {
            return Err(VmError::AlreadyMapped);
        }
        state.pages.insert(
            vpn,
            PageDescriptor {
                vpn,
                writable,
                backing,
                frame: None,
            },
        );
        Ok(())
    }

    /// 查询页描述符
    pub fn lookup(&self, vpn: Vpn) -> Option<PageInfo> {
        self.state.lock().pages.get(&vpn).map(PageDescriptor::info)
    }

    /// 已登记的页数
    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// 是否没有登记任何页
    pub fn is_empty(&self) -> bool {
        self.state.lock().pages.is_empty()
    }

    /// 按虚拟页号升序返回所有页描述符的快照
    pub fn pages(&self) -> Vec<PageInfo> {
        self.state
            .lock()
            .pages
            .values()
            .map(PageDescriptor::info)
            .collect()
    }

    /// 该虚拟页能否被新的映射占用：位于用户空间、未登记、且不在保留栈区内
    pub fn is_available(&self, vpn: Vpn) -> bool {
        let addr = vpn.start_addr().as_usize();
        in_user_space(addr) && !in_stack(addr) && !self.state.lock().pages.contains_key(&vpn)
    }

    /// 查询页目录中的映射
    pub fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)> {
        match self.state.lock().page_dir.as_ref() {
            Some(dir) => dir.walk(vpn),
            None => Err(PagingError::NotMapped),
        }
    }

    /// 在当前 CPU 上激活此地址空间的页目录
    pub fn activate(&self) {
        if let Some(dir) = self.state.lock().page_dir.as_ref() {
            dir.activate();
        }
    }

    /// 移除一个页：驻留时解除映射、写回脏的文件页并释放帧；
    /// 持有交换槽位时丢弃槽位。未登记的页返回 `false`。
    pub fn remove(&self, vpn: Vpn) -> bool {
        let mut pool = self.pool.lock();
        let mut state = self.state.lock();
        let SptState { pages, page_dir } = &mut *state;
        let (Some(dir), Some(desc)) = (page_dir.as_mut(), pages.remove(&vpn)) else {
            return false;
        };
        self.release_page(&mut pool, dir, desc);
        true
    }

    /// 销毁补充页表：释放所有页、停用并销毁页目录。
    ///
    /// 幂等；最后一个引用被 drop 时也会自动调用。
    pub fn destroy(&self) {
        let mut pool = self.pool.lock();
        let mut state = self.state.lock();
        let Some(mut dir) = state.page_dir.take() else {
            return;
        };
        let pages = core::mem::take(&mut state.pages);
        let count = pages.len();
        for desc in pages.into_values() {
            self.release_page(&mut pool, &mut dir, desc);
        }
        dir.deactivate();
        drop(state);
        drop(pool);
        drop(dir);
        log::debug!("vm: page table destroyed, {} pages released", count);
    }

    /// 固定一个驻留页的帧，使其在系统调用期间不被驱逐。
    ///
    /// 页未驻留时返回 `false`。
    pub fn pin_page(&self, vpn: Vpn) -> bool {
        let state = self.state.lock();
        match state.pages.get(&vpn).and_then(|desc| desc.frame) {
            Some(frame) => {
                self.pool.pin(frame);
                true
            }
            None => false,
        }
    }

    /// 解除固定
    pub fn unpin_page(&self, vpn: Vpn) {
        let state = self.state.lock();
        if let Some(frame) = state.pages.get(&vpn).and_then(|desc| desc.frame) {
            self.pool.unpin(frame);
        }
    }

    /// 持锁访问驻留页的内容
    ///
    /// 置位访问位，`write` 时同时置位脏位。页未驻留时返回 `None`。
    pub(crate) fn with_resident<R>(
        &self,
        vpn: Vpn,
        write: bool,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        let SptState { pages, page_dir } = &mut *state;
        let dir = page_dir.as_mut()?;
        let frame = pages.get(&vpn)?.frame?;
        dir.set_accessed(vpn, true);
        if write {
            dir.set_dirty(vpn, true);
        }
        // SAFETY: 持有补充页表锁，该帧不会被驱逐或释放
        let bytes = unsafe { self.pool.frame_bytes(frame) };
        Some(f(bytes))
    }

    /// 将已分配（且已固定）的帧装载为 `vpn` 的内容并安装映射。
    ///
    /// 成功时帧在释放锁之前解除固定；其余情况下帧保持固定，由调用者释放。
    pub(crate) fn load(&self, vpn: Vpn, frame: FrameId) -> LoadOutcome {
        let mut state = self.state.lock();
        let SptState { pages, page_dir } = &mut *state;
        let (Some(dir), Some(desc)) = (page_dir.as_mut(), pages.get_mut(&vpn)) else {
            return LoadOutcome::Vanished;
        };
        if desc.frame.is_some() {
            return LoadOutcome::AlreadyPresent;
        }

        // SAFETY: 帧刚分配且处于固定状态，不会被其他线程访问
        let bytes = unsafe { self.pool.frame_bytes(frame) };
        if let Err(err) = populate(&*self.pool, &mut desc.backing, bytes) {
            return LoadOutcome::Failed(err);
        }

        let ppn = self.pool.ppn(frame);
        if let Err(err) = dir.map(vpn, ppn, UniversalPTEFlag::user_page(desc.writable)) {
            log::error!(
                "vm: failed to map vpn {:#x} -> ppn {:#x}: {:?}",
                vpn.as_usize(),
                ppn.as_usize(),
                err
            );
            panic!("vm: failed to install page mapping");
        }
        dir.set_dirty(vpn, false);
        dir.set_accessed(vpn, false);
        desc.frame = Some(frame);
        self.pool.unpin(frame);
        LoadOutcome::Loaded
    }

    /// 由帧池在时钟扫描中调用（已持有帧池锁）
    pub(crate) fn try_evict(&self, vpn: Vpn, frame: FrameId, pool: &FramePool<D>) -> EvictOutcome {
        let mut state = self.state.lock();
        // 固定标志可能在获取本锁之前被设置
        if pool.is_pinned(frame) {
            return EvictOutcome::Pinned;
        }
        let SptState { pages, page_dir } = &mut *state;
        let (desc, dirty) = match (page_dir.as_mut(), pages.get_mut(&vpn)) {
            (Some(dir), Some(desc)) if desc.frame == Some(frame) => {
                if dir.is_accessed(vpn) {
                    dir.set_accessed(vpn, false);
                    return EvictOutcome::Referenced;
                }
                let dirty = unmap_or_panic(dir, vpn).contains(UniversalPTEFlag::DIRTY);
                (desc, dirty)
            }
            _ => {
                log::error!(
                    "vm: frame {} owned by vpn {:#x} has no matching descriptor",
                    frame.index(),
                    vpn.as_usize()
                );
                panic!("vm: missing victim descriptor");
            }
        };

        // SAFETY: 映射已解除且持有补充页表锁，没有其他访问者
        let bytes = unsafe { pool.frame_bytes(frame) };
        let backing = core::mem::replace(&mut desc.backing, PageBacking::Zero);
        desc.backing = match backing {
            PageBacking::File(fb) if dirty && fb.write_back => {
                write_back(&fb, bytes);
                PageBacking::File(fb)
            }
            PageBacking::File(_) | PageBacking::Zero if dirty => {
                PageBacking::Swapped(Some(swap_out(pool, bytes)))
            }
            PageBacking::Swapped(slot) => {
                debug_assert!(slot.is_none());
                PageBacking::Swapped(Some(swap_out(pool, bytes)))
            }
            clean => clean,
        };
        desc.frame = None;
        EvictOutcome::Evicted
    }

    /// 释放一个已从表中摘下的页描述符（持有帧池锁与补充页表锁）
    fn release_page(&self, pool: &mut PoolInner<D>, dir: &mut D, desc: PageDescriptor) {
        match desc.frame {
            Some(frame) => {
                let dirty = unmap_or_panic(dir, desc.vpn).contains(UniversalPTEFlag::DIRTY);
                if let PageBacking::File(fb) = &desc.backing {
                    if dirty && fb.write_back {
                        // SAFETY: 映射已解除且持有补充页表锁
                        write_back(fb, unsafe { self.pool.frame_bytes(frame) });
                    }
                }
                self.pool.release_locked(pool, frame);
            }
            None => {
                if let PageBacking::Swapped(Some(slot)) = desc.backing {
                    self.pool.swap().swap_drop(slot);
                }
            }
        }
    }
}

impl<D: PageDirectory> Drop for SupplementalPageTable<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// 清除驻留页的映射，返回清除时的最终标志
fn unmap_or_panic<D: PageDirectory>(dir: &mut D, vpn: Vpn) -> UniversalPTEFlag {
    match dir.unmap(vpn) {
        Ok(flags) => flags,
        Err(err) => {
            log::error!("vm: resident vpn {:#x} not in page directory: {:?}", vpn.as_usize(), err);
            panic!("vm: page directory out of sync");
        }
    }
}

/// 按后备来源填充帧内容
fn populate<D: PageDirectory>(
    pool: &FramePool<D>,
    backing: &mut PageBacking,
    bytes: &mut [u8],
) -> VmResult<()> {
    match backing {
        PageBacking::Zero => bytes.fill(0),
        PageBacking::File(fb) => {
            let read = with_filesys_lock(|| fb.file.read_at(fb.offset, &mut bytes[..fb.length]));
            let n = read.map_err(|errno| {
                log::warn!("vm: read of {} bytes at {:#x} failed: {}", fb.length, fb.offset, errno);
                VmError::Io
            })?;
            // 短读不算错误，剩余部分填零
            bytes[n.min(fb.length)..].fill(0);
        }
        PageBacking::Swapped(slot) => {
            let Some(slot) = slot.take() else {
                log::error!("vm: swapped page is neither resident nor in swap");
                panic!("vm: swapped page without swap slot");
            };
            pool.swap().swap_in(slot, bytes);
        }
    }
    Ok(())
}

fn swap_out<D: PageDirectory>(pool: &FramePool<D>, bytes: &[u8]) -> SwapSlot {
    match pool.swap().swap_out(bytes) {
        Some(slot) => slot,
        None => {
            log::error!("vm: swap device is full");
            panic!("vm: swap full");
        }
    }
}

fn write_back(fb: &FileBacking, bytes: &[u8]) {
    match with_filesys_lock(|| fb.file.write_at(fb.offset, &bytes[..fb.length])) {
        Ok(n) if n == fb.length => {}
        Ok(n) => log::error!(
            "vm: short write-back at {:#x}: {} of {} bytes",
            fb.offset,
            n,
            fb.length
        ),
        Err(errno) => log::error!("vm: write-back at {:#x} failed: {}", fb.offset, errno),
    }
}
