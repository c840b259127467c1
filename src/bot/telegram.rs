//! Telegram long-polling dispatcher

use crate::bot::command::BOT_COMMANDS;
use crate::bot::handlers::BotHandlers;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::BotCommand;
use tracing::{error, info, warn};

/// Register the `/` menu, then answer commands until the process receives Ctrl-C.
pub async fn run_dispatcher(bot: Bot, handlers: Arc<BotHandlers>) {
    if let Err(e) = register_bot_commands(&bot).await {
        warn!(error = %e, "Failed to register bot commands with Telegram");
    }

    info!("Telegram command listener started");

    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let handlers = handlers.clone();
        async move {
            let Some(text) = msg.text() else {
                return respond(());
            };

            // Private chats share their id with the user.
            let user_id = msg.chat.id.0;
            if let Some(reply) = handlers.handle(user_id, text).await {
                if let Err(e) = bot.send_message(msg.chat.id, reply).await {
                    error!(error = %e, user_id = user_id, "Failed to send command reply");
                }
            }

            respond(())
        }
    })
    .await;
}

async fn register_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    let commands: Vec<BotCommand> = BOT_COMMANDS
        .iter()
        .map(|(cmd, desc)| BotCommand::new(*cmd, *desc))
        .collect();

    bot.set_my_commands(commands).await?;
    info!("Registered bot commands with Telegram");
    Ok(())
}
