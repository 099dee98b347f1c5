//! 文件映射接口 trait 定义
//!
//! 文件系统对本子系统只暴露最小的读写接口。所有文件调用都必须
//! 持有全局文件系统锁，统一通过 [`with_filesys_lock`] 进行。
//!
//! 加锁顺序中文件系统锁位于最内层：持有它时不得再获取帧池锁或补充页表锁。

use alloc::sync::Arc;
use lazy_static::lazy_static;
use sync::SpinLock;

/// 可映射到内存的文件接口
///
/// 此 trait 抽象了文件映射所需的最小接口。
/// 一个 `Arc<dyn MmFile>` 即一个打开的文件句柄，最后一个引用被 drop 即关闭。
pub trait MmFile: Send + Sync {
    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件当前长度（字节）
    fn length(&self) -> usize;

    /// 重新打开同一文件，得到生命周期独立的新句柄
    fn reopen(&self) -> Result<Arc<dyn MmFile>, isize>;
}

/// 进程的文件描述符查询接口
///
/// mmap 通过它把用户传入的 fd 解析为打开的文件。
pub trait FdLookup {
    /// 获取 fd 对应的打开文件
    fn get_file(&self, fd: i32) -> Option<Arc<dyn MmFile>>;
}

lazy_static! {
    /// 全局文件系统锁，串行化所有文件调用。
    static ref FILESYS_LOCK: SpinLock<()> = SpinLock::new(());
}

/// 持有文件系统锁执行 `f`
pub fn with_filesys_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = FILESYS_LOCK.lock();
    f()
}
