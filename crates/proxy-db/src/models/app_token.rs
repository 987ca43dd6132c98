use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An API key with its per-second request budget.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AppToken {
    pub name: String,
    pub token: String,
    /// Requests per second.
    pub rate: f32,
}
