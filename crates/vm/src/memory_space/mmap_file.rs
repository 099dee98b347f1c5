//! mmap 文件映射信息

use alloc::sync::Arc;
use uapi::mm::MapId;

use crate::address::{Vpn, VpnRange};
use crate::file::MmFile;

/// 一个文件映射区域
pub struct MappedFile {
    /// 映射 ID
    pub id: MapId,
    /// 映射私有的文件句柄（mmap 时重新打开，与进程的 fd 无关）
    pub file: Arc<dyn MmFile>,
    /// 映射的起始虚拟页
    pub base: Vpn,
    /// 映射的页数
    pub page_count: usize,
}

impl MappedFile {
    /// 映射覆盖的虚拟页范围
    pub fn vpn_range(&self) -> VpnRange {
        VpnRange::from_start_len(self.base, self.page_count)
    }
}

// 手动实现 Debug，因为 dyn MmFile 没有实现 Debug
impl core::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MappedFile")
            .field("id", &self.id)
            .field("file", &"<dyn MmFile>")
            .field("base", &self.base)
            .field("page_count", &self.page_count)
            .finish()
    }
}
