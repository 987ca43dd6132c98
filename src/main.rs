use proxy_api::{ApiConfig, ApiServer, AppState};
use proxy_core::chains;
use proxy_db::repositories::{
    AlertRepository, AppTokenRepository, CoinRepository, HistoricalPriceRepository,
    RequestLogRepository,
};
use proxy_db::{DatabaseConfig, DatabasePool};
use proxy_redis::{RedisConfig, RedisConnection};
use proxy_resolver::{CoalescingEngine, PriceResolver, PriceService, ResolverConfig};
use proxy_scheduler::Scheduler;
use proxy_sources::{
    CoingeckoOnChainSource, CoingeckoSource, DefillamaSource, DodoexRouteSource,
    GeckoterminalSource, SourcesConfig,
};
use proxy_throttle::{AlertNotifier, AlertService, CoinsThrottler, NotifierConfig};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("proxy_resolver=info".parse()?)
                .add_directive("proxy_sources=info".parse()?),
        )
        .init();

    info!("Token price proxy starting...");

    // Process-wide chain state (CHAIN_MAPPING, USDT_ADDRESSES, allow/refuse
    // lists).
    chains::load_from_env();

    // Shared cache.
    let redis_config = RedisConfig::from_env();
    let redis = match RedisConnection::new(redis_config).await {
        Ok(redis) => redis,
        Err(e) => {
            error!(error = %e, "Failed to connect to Redis");
            std::process::exit(1);
        }
    };

    // Relational store.
    let db_config = DatabaseConfig::from_env();
    let db = match DatabasePool::new(&db_config).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };
    if let Err(e) = db.migrate().await {
        error!(error = %e, "Failed to run database migrations");
        std::process::exit(1);
    }
    info!("Database connected and migrations applied");

    // Stores.
    let coin_repo = CoinRepository::new(db.clone(), redis.clone());
    let historical_repo =
        HistoricalPriceRepository::new(db.clone(), redis.clone(), coin_repo.clone());
    let request_log_repo = RequestLogRepository::new(db.clone(), redis.clone());
    let alert_repo = AlertRepository::new(db.clone(), redis.clone());
    let app_token_repo = AppTokenRepository::new(db.clone(), redis.clone());

    // Failure reporting and throttling.
    let notifier_config = NotifierConfig::from_env();
    if notifier_config.is_configured() {
        info!("Operator alert webhook enabled");
    }
    let notifier = AlertNotifier::new(notifier_config, redis.clone());
    let throttler = CoinsThrottler::new(redis.clone(), coin_repo.clone());
    let alerts = AlertService::new(alert_repo.clone());

    // Upstream sources.
    let sources_config = SourcesConfig::from_env();
    let coingecko = CoingeckoSource::new(
        &sources_config,
        redis.clone(),
        coin_repo.clone(),
        historical_repo.clone(),
        notifier.clone(),
    );
    let geckoterminal = GeckoterminalSource::new(
        &sources_config,
        redis.clone(),
        coin_repo.clone(),
        historical_repo.clone(),
        notifier.clone(),
    );
    let coingecko_onchain = CoingeckoOnChainSource::new(
        &sources_config,
        redis.clone(),
        coin_repo.clone(),
        historical_repo.clone(),
        coingecko.clone(),
        notifier.clone(),
    );
    let defillama = DefillamaSource::new(
        &sources_config,
        redis.clone(),
        coin_repo.clone(),
        historical_repo.clone(),
        notifier.clone(),
    );
    let dodoex_route = DodoexRouteSource::new(
        &sources_config,
        redis.clone(),
        coin_repo.clone(),
        historical_repo.clone(),
    );

    // Resolver and the coalescing engine (one worker + one subscriber per
    // instance).
    let resolver_config = ResolverConfig::from_env();
    let resolver = PriceResolver::new(
        coingecko.clone(),
        geckoterminal,
        coingecko_onchain,
        defillama,
        dodoex_route,
        coin_repo.clone(),
        throttler,
        alerts,
        resolver_config,
    );
    let engine = CoalescingEngine::new(redis.clone(), resolver.clone());
    engine.start();
    info!("Coalescing engine started");

    let price_service = PriceService::new(resolver, engine);

    // Periodic maintenance.
    let scheduler = Scheduler::new(
        redis.clone(),
        coin_repo.clone(),
        historical_repo.clone(),
        alert_repo.clone(),
        request_log_repo.clone(),
        coingecko.clone(),
    );
    scheduler.start();

    // HTTP surface.
    let api_config = ApiConfig::from_env();
    let state = AppState {
        config: api_config,
        price: price_service,
        coingecko,
        coin_repo: coin_repo.clone(),
        app_tokens: app_token_repo,
        request_logs: request_log_repo.clone(),
        redis: redis.clone(),
        db: db.clone(),
    };
    let server = ApiServer::new(state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "API server error");
        }
    });

    // Run until Ctrl+C, then drain what we can before exit.
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received (Ctrl+C)");
    server_handle.abort();

    if let Err(e) = coin_repo.process_queue().await {
        error!(error = %e, "Final coin queue drain failed");
    }
    if let Err(e) = historical_repo.process_queue().await {
        error!(error = %e, "Final historical price queue drain failed");
    }
    if let Err(e) = request_log_repo.process_queue().await {
        error!(error = %e, "Final request log queue drain failed");
    }
    if let Err(e) = alert_repo.process_queue().await {
        error!(error = %e, "Final alert queue drain failed");
    }

    db.close().await;
    info!("Token price proxy shutdown complete");
    Ok(())
}
