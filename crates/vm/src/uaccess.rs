//! 内核对用户内存的受检访问
//!
//! 系统调用读写用户缓冲区时，逐页处理：先按缺页流程把页装入内存，
//! 再在补充页表锁内拷贝数据。持锁期间该页不会被驱逐。
//! 如果两步之间页被驱逐，重新装载后再试。

use alloc::sync::Arc;

use crate::address::{PageNum, UsizeConvert, Vaddr, Vpn};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::fault::handle_page_fault;
use crate::page::SupplementalPageTable;
use crate::page_table::PageDirectory;

/// 从用户地址 `src` 读取 `dst.len()` 字节（跨页安全）
///
/// # Errors
/// 任一页不可访问时返回错误，`dst` 中可能已有部分数据。
pub fn copy_from_user<D: PageDirectory>(
    spt: &Arc<SupplementalPageTable<D>>,
    user_sp: usize,
    src: usize,
    dst: &mut [u8],
) -> VmResult<()> {
    let mut done = 0;
    while done < dst.len() {
        let va = src.checked_add(done).ok_or(VmError::SegmentationFault)?;
        let off = va % PAGE_SIZE;
        let take = core::cmp::min(dst.len() - done, PAGE_SIZE - off);
        let chunk = &mut dst[done..done + take];
        access_page(spt, user_sp, va, false, |page| {
            chunk.copy_from_slice(&page[off..off + take]);
        })?;
        done += take;
    }
    Ok(())
}

/// 向用户地址 `dst` 写入 `src`（跨页安全）
///
/// # Errors
/// 任一页不可访问或只读时返回错误，此前的页可能已被写入。
pub fn copy_to_user<D: PageDirectory>(
    spt: &Arc<SupplementalPageTable<D>>,
    user_sp: usize,
    dst: usize,
    src: &[u8],
) -> VmResult<()> {
    let mut done = 0;
    while done < src.len() {
        let va = dst.checked_add(done).ok_or(VmError::SegmentationFault)?;
        let off = va % PAGE_SIZE;
        let take = core::cmp::min(src.len() - done, PAGE_SIZE - off);
        let chunk = &src[done..done + take];
        access_page(spt, user_sp, va, true, |page| {
            page[off..off + take].copy_from_slice(chunk);
        })?;
        done += take;
    }
    Ok(())
}

fn access_page<D: PageDirectory>(
    spt: &Arc<SupplementalPageTable<D>>,
    user_sp: usize,
    va: usize,
    write: bool,
    f: impl FnOnce(&mut [u8]),
) -> VmResult<()> {
    let vpn = Vpn::from_addr_floor(Vaddr::from_usize(va));
    let mut f = Some(f);
    loop {
        handle_page_fault(spt, va, user_sp, write)?;
        let done = spt.with_resident(vpn, write, |page| {
            if let Some(f) = f.take() {
                f(page);
            }
        });
        if done.is_some() {
            return Ok(());
        }
        log::trace!("vm: vpn {:#x} evicted before access, retrying", vpn.as_usize());
    }
}
