use proxy_core::chains;
use proxy_db::models::AlertRecord;
use proxy_db::repositories::AlertRepository;

/// Records throttle alerts for the operator pipeline.
#[derive(Clone)]
pub struct AlertService {
    alert_repo: AlertRepository,
}

impl AlertService {
    pub fn new(alert_repo: AlertRepository) -> Self {
        Self { alert_repo }
    }

    /// Queue one alert record for `(source, coin, day)`. Refused chains are
    /// never alerted on.
    pub fn save_log(&self, source: &str, chain_id: &str, address: &str, day: String, timestamp: i64) {
        if chains::is_chain_refused(chain_id) {
            return;
        }
        let record = AlertRecord::new(
            source,
            proxy_core::types::coin_id(chain_id, address),
            day,
            timestamp,
        );
        self.alert_repo.insert_alert(record);
    }
}
