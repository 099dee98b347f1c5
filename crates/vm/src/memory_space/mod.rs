//! 内存空间模块
//!
//! 本模块定义了用户进程的地址空间：补充页表加上该进程的文件映射列表，
//! 并提供 mmap/munmap、缺页入口与用户内存拷贝。

mod mmap_file;
mod space;

pub use mmap_file::MappedFile;
pub use space::*;
