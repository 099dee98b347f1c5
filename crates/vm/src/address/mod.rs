//! 地址模块
//!
//! 此模块提供了用于处理物理地址和虚拟地址，
//! 以及虚拟内存子系统中的页码的抽象。
//!
//! # 地址类型
//!
//! - [`Paddr`] - 物理地址类型
//! - [`Vaddr`] - 虚拟地址类型
//!
//! # 页码
//!
//! - [`PageNum`] - 表示页码的 Trait
//! - [`Ppn`] - 物理页码（Physical Page Number）
//! - [`Vpn`] - 虚拟页码（Virtual Page Number）
//! - [`VpnRange`] - 虚拟页码范围 `[start, end)`
pub mod page_num;

pub use page_num::{PageNum, PageNumRange, Ppn, Vpn, VpnRange};

use crate::config::{PAGE_MASK, PAGE_SIZE};

/// 在类型和 usize 之间进行转换
pub trait UsizeConvert: Copy {
    /// 转换为 usize
    fn as_usize(&self) -> usize;
    /// 从 usize 构造
    fn from_usize(value: usize) -> Self;
}

/// 地址对齐操作
pub trait AlignOps: UsizeConvert {
    /// 页内偏移
    fn page_offset(self) -> usize {
        self.as_usize() & PAGE_MASK
    }

    /// 是否按页对齐
    fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// 向下对齐到页边界
    fn align_down_to_page(self) -> Self {
        Self::from_usize(self.as_usize() & !PAGE_MASK)
    }

    /// 向上对齐到页边界
    fn align_up_to_page(self) -> Self {
        Self::from_usize(self.as_usize().div_ceil(PAGE_SIZE) * PAGE_SIZE)
    }
}

macro_rules! impl_address {
    ($type:ident) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl AlignOps for $type {}

        impl From<usize> for $type {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }
    };
}

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Paddr(pub usize);
impl_address!(Paddr);

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Vaddr(pub usize);
impl_address!(Vaddr);
