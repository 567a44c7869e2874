//! 记忆层：对话记录（Transcript）与工作记忆（Scratchpad），均以单次运行为生命周期

pub mod conversation;
pub mod working;

pub use conversation::{Message, Role, Transcript};
pub use working::{keys, Scratchpad, ScratchpadEntry};
