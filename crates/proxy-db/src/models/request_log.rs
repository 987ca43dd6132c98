use serde::{Deserialize, Serialize};

/// Append-only record of one external API call. Physically deleted after
/// the 3-day retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub ip_address: String,
    pub endpoint: String,
    pub request_params: String,
    pub response: String,
    /// Execution time in milliseconds.
    pub execution_time: i64,
}
