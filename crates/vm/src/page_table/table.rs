//! 页目录接口
//!
//! ## 设计要点
//!
//! - `PageDirectory` 由各架构实现（例如不同 MMU、不同页表格式）。
//! - 上层（补充页表、缺页处理）只依赖该 trait，
//!   从而实现“按需分页逻辑”与“页表硬件细节”的解耦。
//! - 访问位与脏位由硬件维护，时钟置换算法和写回逻辑通过本接口读取并清除它们。
//!   驱逐与移除时的脏位取自 `unmap` 的返回值：先清除映射，再读脏位。
//! - 页目录的销毁即 `Drop`。

use super::{PagingResult, UniversalPTEFlag};
use crate::address::{Ppn, Vpn};

/// 一个用户地址空间的地址转换表
pub trait PageDirectory: Send {
    /// 创建新的空页目录
    fn new() -> Self
    where
        Self: Sized;

    /// 安装映射：虚拟页 → 物理页，使用给定标志
    fn map(&mut self, vpn: Vpn, ppn: Ppn, flags: UniversalPTEFlag) -> PagingResult<()>;

    /// 清除虚拟页的映射，并刷新对应的 TLB 条目。
    ///
    /// 返回清除时页表项的最终标志。映射清除之前硬件仍可能置位访问位与脏位，
    /// 只有这里返回的值才是可信的。
    fn unmap(&mut self, vpn: Vpn) -> PagingResult<UniversalPTEFlag>;

    /// 查询虚拟页的映射，返回物理页号和标志
    fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)>;

    /// 设置或清除脏位
    fn set_dirty(&mut self, vpn: Vpn, dirty: bool);

    /// 读取访问位
    fn is_accessed(&self, vpn: Vpn) -> bool;

    /// 设置或清除访问位
    fn set_accessed(&mut self, vpn: Vpn, accessed: bool);

    /// 在当前 CPU 上激活此页目录
    fn activate(&self);

    /// 若此页目录处于激活状态，切换回内核页目录
    fn deactivate(&self);
}
