//! 同步原语
//!
//! 向 vm 等内核模块提供基本的互斥锁。
//!
//! # 设计
//!
//! - [`RawSpinLock`]：基于原子操作的裸自旋锁，实现 [`lock_api::RawMutex`]
//! - [`SpinLock`]：由 `lock_api` 包装出的带数据互斥锁，RAII 自动释放
//!
//! 虚拟内存子系统中的所有锁域（帧池锁、各进程补充页表锁、文件系统锁）
//! 都使用 [`SpinLock`]。锁不可重入，加锁顺序由调用方保证。

#![no_std]

#[cfg(test)]
extern crate std;

mod raw_spin_lock;
mod spin_lock;

pub use raw_spin_lock::*;
pub use spin_lock::*;
