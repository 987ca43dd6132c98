use crate::config::ApiConfig;
use proxy_db::repositories::{AppTokenRepository, CoinRepository, RequestLogRepository};
use proxy_db::DatabasePool;
use proxy_redis::RedisConnection;
use proxy_resolver::PriceService;
use proxy_sources::CoingeckoSource;

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub price: PriceService,
    pub coingecko: CoingeckoSource,
    pub coin_repo: CoinRepository,
    pub app_tokens: AppTokenRepository,
    pub request_logs: RequestLogRepository,
    pub redis: RedisConnection,
    pub db: DatabasePool,
}
