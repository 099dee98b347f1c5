//! 地址空间核心实现

use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;
use uapi::fcntl::is_console_fd;
use uapi::mm::{MAP_FAILED, MapId};

use crate::address::{AlignOps, PageNum, UsizeConvert, Vaddr, Vpn, VpnRange};
use crate::config::{PAGE_SIZE, in_stack, in_user_space};
use crate::error::{VmError, VmResult};
use crate::fault::handle_page_fault;
use crate::file::{FdLookup, MmFile, with_filesys_lock};
use crate::frame_allocator::FramePool;
use crate::memory_space::MappedFile;
use crate::page::{FileBacking, SupplementalPageTable};
use crate::page_table::PageDirectory;
use crate::uaccess;

struct MmapTable {
    regions: Vec<MappedFile>,
    /// 下一个映射 ID，耗尽后为 `None`
    next_id: Option<MapId>,
}

/// 用户进程的地址空间
///
/// 加锁顺序：映射列表锁 → 帧池锁 → 补充页表锁 → 文件系统锁。
pub struct AddressSpace<D: PageDirectory> {
    spt: Arc<SupplementalPageTable<D>>,
    mmaps: SpinLock<MmapTable>,
}

impl<D: PageDirectory> AddressSpace<D> {
    /// 创建一个空的地址空间
    pub fn new(pool: Arc<FramePool<D>>) -> Self {
        AddressSpace {
            spt: SupplementalPageTable::new(pool),
            mmaps: SpinLock::new(MmapTable {
                regions: Vec::new(),
                next_id: Some(0),
            }),
        }
    }

    /// 返回补充页表的引用
    pub fn spt(&self) -> &Arc<SupplementalPageTable<D>> {
        &self.spt
    }

    /// 将 `fd` 对应的文件整体映射到页对齐地址 `addr`，返回映射 ID。
    ///
    /// 映射使用重新打开的私有文件句柄，之后关闭 `fd` 不影响映射。
    /// 所有页都可写，脏页在解除映射或被驱逐时写回文件。
    ///
    /// # Errors
    /// - `fd` 为标准输入/输出或不存在：[`VmError::BadFileDescriptor`]
    /// - `addr` 为 0、未按页对齐，或映射范围越出用户空间、落入栈区：[`VmError::InvalidAddress`]
    /// - 文件长度为 0：[`VmError::EmptyFile`]
    /// - 范围内任一页已被占用：[`VmError::AlreadyMapped`]
    /// - 重新打开文件失败：[`VmError::Io`]
    /// - 映射 ID 已耗尽：[`VmError::TooManyMappings`]
    pub fn mmap(&self, fds: &dyn FdLookup, fd: i32, addr: usize) -> VmResult<MapId> {
        if is_console_fd(fd) {
            return Err(VmError::BadFileDescriptor);
        }
        let base_addr = Vaddr::from_usize(addr);
        if addr == 0 || !base_addr.is_page_aligned() {
            return Err(VmError::InvalidAddress);
        }
        let opened = fds.get_file(fd).ok_or(VmError::BadFileDescriptor)?;
        let (file, len) = with_filesys_lock(|| -> Result<_, isize> {
            let file = opened.reopen()?;
            let len = file.length();
            Ok((file, len))
        })
        .map_err(|errno| {
            log::warn!("vm: mmap: reopen of fd {} failed: {}", fd, errno);
            VmError::Io
        })?;
        if len == 0 {
            close(file);
            return Err(VmError::EmptyFile);
        }

        let range = VpnRange::from_start_len(Vpn::from_addr_floor(base_addr), len.div_ceil(PAGE_SIZE));
        let mut table = self.mmaps.lock();
        let Some(id) = table.next_id else {
            close(file);
            return Err(VmError::TooManyMappings);
        };
        if let Some(vpn) = range.iter().find(|&vpn| !self.spt.is_available(vpn)) {
            close(file);
            let addr = vpn.start_addr().as_usize();
            return Err(if !in_user_space(addr) || in_stack(addr) {
                VmError::InvalidAddress
            } else {
                VmError::AlreadyMapped
            });
        }

        for (i, vpn) in range.iter().enumerate() {
            let offset = i * PAGE_SIZE;
            let backing = FileBacking {
                file: Arc::clone(&file),
                offset,
                length: core::cmp::min(PAGE_SIZE, len - offset),
                write_back: true,
            };
            if let Err(err) = self.spt.declare_file(vpn, backing, true) {
                for declared in range.iter().take(i) {
                    self.spt.remove(declared);
                }
                close(file);
                return Err(err);
            }
        }

        table.next_id = id.checked_add(1);
        table.regions.push(MappedFile {
            id,
            file,
            base: range.start(),
            page_count: range.len(),
        });
        log::debug!(
            "vm: mmap {} -> [{:#x}, {:#x}), {} bytes",
            id,
            range.start().start_addr().as_usize(),
            range.end().start_addr().as_usize(),
            len
        );
        Ok(id)
    }

    /// mmap 系统调用入口，失败时返回 [`MAP_FAILED`]
    pub fn sys_mmap(&self, fds: &dyn FdLookup, fd: i32, addr: usize) -> MapId {
        self.mmap(fds, fd, addr).unwrap_or_else(|err| {
            log::debug!("vm: mmap(fd={}, addr={:#x}) failed: {:?}", fd, addr, err);
            MAP_FAILED
        })
    }

    /// 解除映射：写回脏页、释放所有页并关闭私有文件句柄。未知 ID 直接忽略。
    pub fn munmap(&self, id: MapId) {
        let mut table = self.mmaps.lock();
        let Some(pos) = table.regions.iter().position(|region| region.id == id) else {
            return;
        };
        let region = table.regions.remove(pos);
        self.release_region(region);
    }

    /// 解除所有文件映射（进程退出时调用）
    pub fn unmap_all(&self) {
        let mut table = self.mmaps.lock();
        for region in table.regions.drain(..) {
            self.release_region(region);
        }
    }

    fn release_region(&self, region: MappedFile) {
        for vpn in region.vpn_range().iter() {
            self.spt.remove(vpn);
        }
        log::debug!("vm: munmap {}", region.id);
        close(region.file);
    }

    /// 映射 ID 对应的虚拟页范围
    pub fn mapping(&self, id: MapId) -> Option<VpnRange> {
        self.mmaps
            .lock()
            .regions
            .iter()
            .find(|region| region.id == id)
            .map(MappedFile::vpn_range)
    }

    #[cfg(test)]
    pub(crate) fn set_next_map_id(&self, id: MapId) {
        self.mmaps.lock().next_id = Some(id);
    }

    /// 当前的文件映射数
    pub fn mapping_count(&self) -> usize {
        self.mmaps.lock().regions.len()
    }

    /// 缺页入口，见 [`handle_page_fault`]
    pub fn handle_fault(&self, fault_addr: usize, user_sp: usize, write: bool) -> VmResult<()> {
        handle_page_fault(&self.spt, fault_addr, user_sp, write)
    }

    /// 从用户内存读取，见 [`uaccess::copy_from_user`]
    pub fn copy_from_user(&self, user_sp: usize, src: usize, dst: &mut [u8]) -> VmResult<()> {
        uaccess::copy_from_user(&self.spt, user_sp, src, dst)
    }

    /// 写入用户内存，见 [`uaccess::copy_to_user`]
    pub fn copy_to_user(&self, user_sp: usize, dst: usize, src: &[u8]) -> VmResult<()> {
        uaccess::copy_to_user(&self.spt, user_sp, dst, src)
    }

    /// 切换到此地址空间
    pub fn activate(&self) {
        self.spt.activate();
    }

    /// 进程退出：先解除所有文件映射，再销毁补充页表。可重复调用。
    pub fn exit(&self) {
        self.unmap_all();
        self.spt.destroy();
    }
}

impl<D: PageDirectory> Drop for AddressSpace<D> {
    fn drop(&mut self) {
        self.exit();
    }
}

/// 在文件系统锁内关闭文件句柄
fn close(file: Arc<dyn MmFile>) {
    with_filesys_lock(|| drop(file));
}
