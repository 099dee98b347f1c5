//! 文件描述符相关常量

/// 标准输入（控制台输入）
pub const STDIN_FILENO: i32 = 0;
/// 标准输出（控制台输出）
pub const STDOUT_FILENO: i32 = 1;

/// 该 fd 是否为控制台保留的描述符
pub const fn is_console_fd(fd: i32) -> bool {
    fd == STDIN_FILENO || fd == STDOUT_FILENO
}
