//! 页表模块
//!
//! 本模块描述了虚拟内存子系统所依赖的“地址转换表”（页目录）接口。
//! 页目录的具体格式与修改原语由架构实现提供，本子系统只通过 [`PageDirectory`] 使用它。
mod page_table_entry;
mod table;

pub use page_table_entry::*;
pub use table::*;

/// 分页操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 虚拟地址未被映射
    NotMapped,
    /// 虚拟地址已被映射
    AlreadyMapped,
    /// 提供了无效的地址
    InvalidAddress,
    /// 提供了无效的标志（Flags）
    InvalidFlags,
}

/// 分页操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;
