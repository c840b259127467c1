//! Chat-bot front end

pub mod command;
pub mod handlers;
pub mod telegram;

pub use command::{Command, BOT_COMMANDS};
pub use handlers::BotHandlers;
