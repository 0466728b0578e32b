//! 通知层 - 内容构建、排版与分发
//!
//! # 组成
//! 1. `NotificationContent`：单次扫描或合并批次的通知内容
//! 2. `LayoutProvider`：订阅者提供的排版能力
//! 3. `Dispatcher`：后台发送，不阻塞扫描处理

pub mod content;
pub mod dispatcher;
pub mod layout;

pub use content::{NotificationContent, AGGREGATED_TITLE};
pub use dispatcher::Dispatcher;
pub use layout::{LayoutKind, LayoutProvider, MarkdownLayout, PlainTextLayout};
