mod alert;
mod app_token;
mod coin;
mod historical_price;
mod request_log;

pub use alert::AlertRecord;
pub use app_token::AppToken;
pub use coin::Coin;
pub use historical_price::HistoricalPrice;
pub use request_log::RequestLog;
