pub mod app_tokens;
pub mod coins;
pub mod price;
