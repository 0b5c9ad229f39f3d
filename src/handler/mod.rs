//! 事件处理器
//!
//! 每种事件一个文件，均以 `impl Dispatcher` 的形式直接操作 Actor 内部状态。
//! 这里有意不使用 `MessageHandler` trait + 独立结构体：处理器需要 `&mut` 独占注册表和封禁表，
//! 只能在 Dispatcher 任务内部顺序执行。

mod connect_message_handler;
mod disconnect_message_handler;
mod send_message_handler;
