//! 虚拟内存配置 trait 定义和注册

use core::sync::atomic::{AtomicUsize, Ordering};

/// 页大小。本子系统只支持单一的 4KiB 页。
pub const PAGE_SIZE: usize = 4096;

/// 页内偏移掩码
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// 虚拟内存布局配置
///
/// 此 trait 提供用户地址空间布局相关的常量。
/// 内核需要实现此 trait 并在启动时注册。
pub trait VmConfig: Send + Sync {
    /// 用户地址空间的起始地址（包含）。第 0 页永远不可映射。
    fn user_space_start(&self) -> usize;

    /// 用户地址空间的结束地址（不包含），即用户栈顶
    fn user_space_end(&self) -> usize;

    /// 用户栈最大大小，栈区为 `[end - stack_limit, end)`
    fn stack_limit(&self) -> usize;

    /// 栈增长启发式允许的、低于用户栈指针的最大字节数
    fn stack_slack(&self) -> usize;
}

static CONFIG_DATA: AtomicUsize = AtomicUsize::new(0);
static CONFIG_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册配置实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_config(config: &'static dyn VmConfig) {
    let ptr = config as *const dyn VmConfig;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn VmConfig, (usize, usize)>(ptr) };
    CONFIG_VTABLE.store(vtable, Ordering::Release);
    CONFIG_DATA.store(data, Ordering::Release);
}

/// 获取已注册的配置实现
///
/// # Panics
/// 如果尚未调用 [`register_config`] 注册实现，则 panic
#[inline]
pub fn vm_config() -> &'static dyn VmConfig {
    let data = CONFIG_DATA.load(Ordering::Acquire);
    let vtable = CONFIG_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vm: VmConfig not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn VmConfig>((data, vtable)) }
}

/// 地址是否位于用户地址空间内
pub fn in_user_space(addr: usize) -> bool {
    let config = vm_config();
    addr >= config.user_space_start() && addr < config.user_space_end()
}

/// 地址是否位于保留的用户栈区域内
///
/// 栈区下边界本身属于栈区，再低一个字节则不属于。
pub fn in_stack(addr: usize) -> bool {
    let config = vm_config();
    let top = config.user_space_end();
    let bottom = top.saturating_sub(config.stack_limit());
    addr >= bottom && addr < top
}
