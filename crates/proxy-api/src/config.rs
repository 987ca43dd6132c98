use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_cors")]
    pub cors_enabled: bool,

    /// Whether requests without an API key are served
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: bool,

    /// Requests per second for anonymous callers
    #[serde(default = "default_anonymous_rate")]
    pub anonymous_rate: f64,

    /// Hard per-request deadline in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors() -> bool {
    true
}

fn default_allow_anonymous() -> bool {
    true
}

fn default_anonymous_rate() -> f64 {
    1000.0
}

fn default_request_timeout() -> u64 {
    180
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| default_host()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_port),
            cors_enabled: std::env::var("API_CORS_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_cors),
            allow_anonymous: std::env::var("ALLOW_API_KEY")
                .map(|v| v != "false")
                .unwrap_or_else(|_| default_allow_anonymous()),
            anonymous_rate: std::env::var("ALLOW_API_KEY_DEFAULT_RATE_LIMITER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_anonymous_rate),
            request_timeout_secs: std::env::var("API_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_request_timeout),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
