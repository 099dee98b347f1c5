//! 文件相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `vm` crate（避免循环依赖）。
//! `vm` crate 在 `cfg(test)` 下为这些类型实现其 trait（例如 `MmFile` / `FdLookup`）。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sync::SpinLock;

/// 同一文件所有句柄共享的统计信息
#[derive(Debug, Default)]
pub struct FileStats {
    /// 读调用次数
    pub reads: AtomicUsize,
    /// 写调用次数
    pub writes: AtomicUsize,
    /// 当前打开的句柄数
    pub open_handles: AtomicUsize,
    /// 置位后所有读调用失败
    pub fail_reads: AtomicBool,
}

/// Mock 文件句柄
///
/// `reopen_handle` 得到的句柄与原句柄共享内容和统计信息；句柄被 drop 即关闭。
/// 写入不会扩展文件长度。
pub struct MockFile {
    data: Arc<SpinLock<Vec<u8>>>,
    stats: Arc<FileStats>,
}

impl MockFile {
    pub fn new(content: &[u8]) -> Self {
        let stats = Arc::new(FileStats::default());
        stats.open_handles.fetch_add(1, Ordering::Relaxed);
        Self {
            data: Arc::new(SpinLock::new(content.to_vec())),
            stats,
        }
    }

    /// 从 `offset` 读取，返回读到的字节数；设置了读失败时返回 `None`
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Option<usize> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        if self.stats.fail_reads.load(Ordering::Relaxed) {
            return None;
        }
        let data = self.data.lock();
        if offset >= data.len() {
            return Some(0);
        }
        let n = core::cmp::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Some(n)
    }

    /// 向 `offset` 写入，返回写入的字节数
    pub fn write_bytes(&self, offset: usize, buf: &[u8]) -> usize {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = core::cmp::min(buf.len(), data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 打开同一文件的新句柄
    pub fn reopen_handle(&self) -> Self {
        self.stats.open_handles.fetch_add(1, Ordering::Relaxed);
        Self {
            data: Arc::clone(&self.data),
            stats: Arc::clone(&self.stats),
        }
    }

    /// 文件当前内容
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn stats(&self) -> &Arc<FileStats> {
        &self.stats
    }
}

impl Drop for MockFile {
    fn drop(&mut self) {
        self.stats.open_handles.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Mock 的文件描述符表
#[derive(Default)]
pub struct MockFdTable {
    files: SpinLock<BTreeMap<i32, Arc<MockFile>>>,
}

impl MockFdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, fd: i32, file: MockFile) -> Arc<MockFile> {
        let file = Arc::new(file);
        self.files.lock().insert(fd, Arc::clone(&file));
        file
    }

    /// 关闭 fd
    pub fn close(&self, fd: i32) {
        self.files.lock().remove(&fd);
    }

    pub fn get(&self, fd: i32) -> Option<Arc<MockFile>> {
        self.files.lock().get(&fd).cloned()
    }
}
