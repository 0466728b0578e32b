//! 基础设施层 - 文件锁、外部命令

pub mod command;
pub mod locked_json;

pub use command::{resolve_program, run_with_stdin};
pub use locked_json::LockedJsonFile;
