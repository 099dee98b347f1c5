//! Mock 实现模块
//!
//! 提供页目录、交换设备、文件与物理内存的 Mock 实现，用于测试

pub mod fs;
pub mod mm;
pub mod swap;
