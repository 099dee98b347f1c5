//! 页表项标志

use bitflags::bitflags;

bitflags! {
    /// 与架构无关的页表项标志
    ///
    /// 各架构的页目录实现负责将其翻译为硬件页表项格式。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UniversalPTEFlag: usize {
        /// 有效位
        const VALID = 1 << 0;
        /// 可读
        const READABLE = 1 << 1;
        /// 可写
        const WRITEABLE = 1 << 2;
        /// 可执行
        const EXECUTABLE = 1 << 3;
        /// 用户态可访问
        const USER_ACCESSIBLE = 1 << 4;
        /// 访问位（由硬件置位）
        const ACCESSED = 1 << 6;
        /// 脏位（由硬件置位）
        const DIRTY = 1 << 7;
    }
}

impl UniversalPTEFlag {
    /// 用户页的标志：有效、可读、用户可访问，可选可写
    pub fn user_page(writable: bool) -> Self {
        let mut flags = Self::VALID | Self::READABLE | Self::USER_ACCESSIBLE;
        if writable {
            flags |= Self::WRITEABLE;
        }
        flags
    }
}
