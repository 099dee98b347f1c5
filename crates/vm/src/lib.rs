//! 按需分页的虚拟内存子系统
//!
//! 提供物理帧池（时钟置换）、每进程的补充页表、缺页处理、
//! 文件内存映射以及内核对用户内存的受检访问。
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与内核的其余部分解耦：
//! - [`ArchVmOps`]: 物理地址到内核直接映射区的转换
//! - [`VmConfig`]: 用户地址空间布局常量
//! - [`PageDirectory`]: 架构相关的页目录
//! - [`SwapDevice`]: 交换区
//! - [`MmFile`] / [`FdLookup`]: 文件系统与进程的文件描述符表
//!
//! 使用前必须调用 [`register_arch_ops`] 和 [`register_config`] 注册实现。
//!
//! # 加锁顺序
//!
//! 映射列表锁 → 帧池锁 → 补充页表锁 → 文件系统锁。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod arch_ops;
mod config;
mod error;
mod fault;
mod file;
mod swap;
mod uaccess;

pub mod address;
pub mod frame_allocator;
pub mod memory_space;
pub mod page;
pub mod page_table;

#[cfg(test)]
mod tests;

pub use arch_ops::{ArchVmOps, arch_ops, register_arch_ops};
pub use config::{PAGE_MASK, PAGE_SIZE, VmConfig, in_stack, in_user_space, register_config, vm_config};
pub use error::{VmError, VmResult};
pub use fault::{handle_page_fault, resolve_fault};
pub use file::{FdLookup, MmFile, with_filesys_lock};
pub use swap::{SwapDevice, SwapSlot};
pub use uaccess::{copy_from_user, copy_to_user};

// Re-export 常用类型
pub use address::{AlignOps, PageNum, Paddr, Ppn, UsizeConvert, Vaddr, Vpn, VpnRange};
pub use frame_allocator::{FrameId, FramePool, FrameStats};
pub use memory_space::{AddressSpace, MappedFile};
pub use page::{FileBacking, PageBacking, PageInfo, PageKind, SupplementalPageTable};
pub use page_table::{PageDirectory, PagingError, PagingResult, UniversalPTEFlag};
