//! 交换设备接口
//!
//! 交换区只保存匿名内容（由零页演化而来的页，或不写回文件的脏页）。
//! 槽位的编码对本子系统不透明。

/// 交换槽位标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(pub usize);

/// 交换设备
///
/// 实现者自行保证内部并发安全。
pub trait SwapDevice: Send + Sync {
    /// 将一页内容写入一个新的槽位；交换区已满时返回 `None`
    fn swap_out(&self, page: &[u8]) -> Option<SwapSlot>;

    /// 将槽位内容读回 `page`，并释放该槽位
    fn swap_in(&self, slot: SwapSlot, page: &mut [u8]);

    /// 丢弃槽位内容而不读取
    fn swap_drop(&self, slot: SwapSlot);
}
