//! Plain-text chat surface: command parsing and reply rendering.

mod command_text;
mod reply_text;

pub use command_text::parse_command;
pub use reply_text::{render_error, render_reply};
