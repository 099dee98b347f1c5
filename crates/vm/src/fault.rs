//! 缺页处理
//!
//! [`resolve_fault`] 把一个已登记但未驻留的虚拟页装入内存：
//!
//! 1. 持补充页表锁查找描述符：不存在返回 `false`，已驻留返回 `true`；
//! 2. 释放补充页表锁，向帧池申请一个固定的帧（可能驱逐其他页）；
//! 3. 重新获取补充页表锁并复核：描述符消失或已被他人装载时归还帧；
//! 4. 按后备来源填充帧，安装映射，挂接帧并解除固定。
//!
//! 第 2 步不能持有补充页表锁：帧池锁必须先于任何补充页表锁获取。
//!
//! [`handle_page_fault`] 是陷入处理程序的入口，在解决缺页之前检查用户地址，
//! 并按栈增长启发式为栈区中未登记的页登记填零页。

use alloc::sync::Arc;

use crate::address::{PageNum, UsizeConvert, Vaddr, Vpn};
use crate::config::{in_stack, in_user_space, vm_config};
use crate::error::{VmError, VmResult};
use crate::page::{LoadOutcome, SupplementalPageTable};
use crate::page_table::PageDirectory;

/// 将 `vpn` 装入内存。
///
/// 页未登记或后备内容读取失败时返回 `false`；页已驻留或装载成功时返回 `true`。
/// 调用者不得持有补充页表锁或帧池锁。
pub fn resolve_fault<D: PageDirectory>(spt: &Arc<SupplementalPageTable<D>>, vpn: Vpn) -> bool {
    match spt.lookup(vpn) {
        None => return false,
        Some(info) if info.is_present() => return true,
        Some(_) => {}
    }

    let pool = spt.pool();
    let frame = pool.allocate(spt, vpn, true);
    match spt.load(vpn, frame) {
        LoadOutcome::Loaded => true,
        LoadOutcome::AlreadyPresent => {
            pool.free(frame);
            true
        }
        LoadOutcome::Vanished => {
            pool.free(frame);
            false
        }
        LoadOutcome::Failed(err) => {
            log::warn!("vm: failed to load vpn {:#x}: {:?}", vpn.as_usize(), err);
            pool.free(frame);
            false
        }
    }
}

/// 陷入处理程序的缺页入口
///
/// - `fault_addr`: 触发缺页的虚拟地址
/// - `user_sp`: 陷入时的用户栈指针
/// - `write`: 是否为写访问
///
/// # Errors
/// - 地址不在用户空间、页未登记且不满足栈增长条件、或装载失败时返回
///   [`VmError::SegmentationFault`]
/// - 对只读页写入时返回 [`VmError::ReadOnly`]
pub fn handle_page_fault<D: PageDirectory>(
    spt: &Arc<SupplementalPageTable<D>>,
    fault_addr: usize,
    user_sp: usize,
    write: bool,
) -> VmResult<()> {
    if !in_user_space(fault_addr) {
        return Err(VmError::SegmentationFault);
    }
    let vpn = Vpn::from_addr_floor(Vaddr::from_usize(fault_addr));

    match spt.lookup(vpn) {
        Some(info) if write && !info.writable => return Err(VmError::ReadOnly),
        Some(_) => {}
        None if is_stack_access(fault_addr, user_sp) => {
            match spt.declare_zero(vpn, true) {
                // 另一个线程可能抢先登记了同一页
                Ok(()) | Err(VmError::AlreadyMapped) => {}
                Err(err) => return Err(err),
            }
            log::debug!("vm: stack grows to {:#x}", vpn.start_addr().as_usize());
        }
        None => return Err(VmError::SegmentationFault),
    }

    if resolve_fault(spt, vpn) {
        Ok(())
    } else {
        Err(VmError::SegmentationFault)
    }
}

/// 栈增长启发式：地址位于保留栈区内，且不低于 `user_sp - stack_slack`
fn is_stack_access(addr: usize, user_sp: usize) -> bool {
    in_stack(addr) && addr.saturating_add(vm_config().stack_slack()) >= user_sp
}
