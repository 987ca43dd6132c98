pub mod alerts;
pub mod notifier;
pub mod throttler;

pub use alerts::AlertService;
pub use notifier::{AlertNotifier, NotifierConfig};
pub use throttler::CoinsThrottler;
