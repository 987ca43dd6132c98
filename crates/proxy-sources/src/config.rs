use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Coingecko pro API key
    #[serde(default)]
    pub coingecko_api_key: String,

    /// Geckoterminal partner API key
    #[serde(default)]
    pub geckoterminal_api_key: String,

    /// Coingecko on-chain API key
    #[serde(default)]
    pub coingecko_onchain_api_key: String,

    /// Route quoter endpoint
    #[serde(default = "default_route_url")]
    pub dodoex_route_url: String,

    /// Reserve floor below which a suspiciously high price is discarded
    #[serde(default = "default_total_reserve_threshold")]
    pub total_reserve_threshold: f64,

    /// Price ceiling used together with the reserve floor
    #[serde(default = "default_price_usd_threshold")]
    pub price_usd_threshold: f64,
}

fn default_route_url() -> String {
    "https://api.dodoex.io/route-service/v2/backend/swap".to_string()
}

fn default_total_reserve_threshold() -> f64 {
    1000.0
}

fn default_price_usd_threshold() -> f64 {
    100_000.0
}

impl SourcesConfig {
    pub fn from_env() -> Self {
        Self {
            coingecko_api_key: std::env::var("COINGECKO_API_KEY").unwrap_or_default(),
            geckoterminal_api_key: std::env::var("GECKOTERMINAL_API_KEY").unwrap_or_default(),
            coingecko_onchain_api_key: std::env::var("COINGECKO_ONCHAIN_API_KEY")
                .unwrap_or_default(),
            dodoex_route_url: std::env::var("DODOEX_ROUTE_URL")
                .unwrap_or_else(|_| default_route_url()),
            total_reserve_threshold: std::env::var("TOTAL_RESERVE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_total_reserve_threshold),
            price_usd_threshold: std::env::var("PRICE_USD_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_price_usd_threshold),
        }
    }
}
