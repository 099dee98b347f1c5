//! 内存映射相关的用户态接口定义

/// mmap 返回给用户的映射标识符
pub type MapId = i32;

/// mmap 失败时返回给用户的值
pub const MAP_FAILED: MapId = -1;
