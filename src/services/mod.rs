//! External providers and the application service built on them

pub mod coinmarketcap;
pub mod forecast;
pub mod market_data;
pub mod monitor;
pub mod notifier;

pub use coinmarketcap::CoinMarketCapClient;
pub use forecast::{ForecastProvider, LlmForecastClient};
pub use market_data::PriceProvider;
pub use monitor::MonitorService;
pub use notifier::{Notifier, TelegramNotifier};
