//! Chat command parsing

use crate::error::ValidationError;
use crate::models::Condition;
use std::str::FromStr;

/// `(command, description)` pairs registered as the bot's `/` menu
pub const BOT_COMMANDS: &[(&str, &str)] = &[
    ("start", "Introduction and quick help"),
    ("help", "List available commands"),
    ("rate", "Current price and trend: /rate BTC"),
    ("forecast", "Short-term forecast: /forecast BTC"),
    ("subscribe", "Price alert: /subscribe BTC above 50000"),
    ("unsubscribe", "Remove an alert: /unsubscribe BTC"),
    ("mysubs", "List your alerts"),
    ("history", "24h prices (/history BTC) or recent forecasts (/history)"),
    ("notifications", "Your last alerts"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Rate { symbol: String },
    Forecast { symbol: String },
    Subscribe { symbol: String, condition: Condition },
    Unsubscribe { symbol: String },
    MySubs,
    History { symbol: Option<String> },
    Notifications,
}

impl Command {
    /// Parse a chat message.
    ///
    /// Returns `Ok(None)` for plain text that is not a command. A `@botname`
    /// suffix on the command word is ignored.
    pub fn parse(text: &str) -> Result<Option<Self>, ValidationError> {
        let text = text.trim();
        let Some(body) = text.strip_prefix('/') else {
            return Ok(None);
        };

        let mut tokens = body.split_whitespace();
        let word = tokens.next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = tokens.collect();

        let symbol_arg = |args: &[&str]| -> Result<String, ValidationError> {
            args.first()
                .map(|s| s.to_string())
                .ok_or(ValidationError::MissingArgument("symbol"))
        };

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "rate" | "price" => Command::Rate {
                symbol: symbol_arg(&args)?,
            },
            "forecast" => Command::Forecast {
                symbol: symbol_arg(&args)?,
            },
            "subscribe" => {
                let symbol = symbol_arg(&args)?;
                if args.len() < 2 {
                    return Err(ValidationError::MissingArgument("condition"));
                }
                Command::Subscribe {
                    symbol,
                    condition: parse_condition(&args[1..])?,
                }
            }
            "unsubscribe" => Command::Unsubscribe {
                symbol: symbol_arg(&args)?,
            },
            "mysubs" => Command::MySubs,
            "history" => Command::History {
                symbol: args.first().map(|s| s.to_string()),
            },
            "notifications" => Command::Notifications,
            _ => return Err(ValidationError::UnknownCommand(word.to_string())),
        };
        Ok(Some(command))
    }
}

/// A bare number is a percent-change threshold; anything else goes through `Condition::from_str`.
fn parse_condition(args: &[&str]) -> Result<Condition, ValidationError> {
    if let [single] = args {
        if let Ok(threshold) = single.parse::<f64>() {
            let condition = Condition::percent_change(threshold);
            condition
                .validate()
                .map_err(|_| ValidationError::InvalidCondition(single.to_string()))?;
            return Ok(condition);
        }
    }
    Condition::from_str(&args.join(" "))
}
