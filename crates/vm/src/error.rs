//! 虚拟内存错误类型
//!
//! 这里只描述“用户错误”：它们只会导致出错的进程被终止，
//! 可通过 [`VmError::to_errno()`] 转换为系统调用错误码。
//! 资源耗尽与内部不变量被破坏属于致命错误，直接 panic，不经过此类型。

use crate::page_table::PagingError;

/// 虚拟内存错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 该虚拟页已经登记过描述符 (-EEXIST)
    AlreadyMapped,
    /// 该虚拟页没有登记描述符 (-EFAULT)
    NotMapped,
    /// 地址为空、未按页对齐或不在用户地址空间内 (-EINVAL)
    InvalidAddress,
    /// 无效参数 (-EINVAL)
    InvalidArgument,
    /// 无效或保留的文件描述符 (-EBADF)
    BadFileDescriptor,
    /// 被映射的文件长度为 0 (-EINVAL)
    EmptyFile,
    /// 对只读页进行写访问 (-EFAULT)
    ReadOnly,
    /// 缺页无法被解决，进程应被终止 (-EFAULT)
    SegmentationFault,
    /// 读写后备文件失败 (-EIO)
    Io,
    /// 映射 ID 已耗尽 (-ENOMEM)
    TooManyMappings,
}

impl VmError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            VmError::Io => -5,
            VmError::BadFileDescriptor => -9,
            VmError::TooManyMappings => -12,
            VmError::NotMapped | VmError::ReadOnly | VmError::SegmentationFault => -14,
            VmError::AlreadyMapped => -17,
            VmError::InvalidAddress | VmError::InvalidArgument | VmError::EmptyFile => -22,
        }
    }
}

impl From<PagingError> for VmError {
    fn from(err: PagingError) -> Self {
        match err {
            PagingError::NotMapped => VmError::NotMapped,
            PagingError::AlreadyMapped => VmError::AlreadyMapped,
            PagingError::InvalidAddress | PagingError::InvalidFlags => VmError::InvalidAddress,
        }
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
