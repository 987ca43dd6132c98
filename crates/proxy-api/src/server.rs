use crate::middleware::{deadline, rate_limit, request_log};
use crate::routes::{app_tokens, coins, price};
use crate::state::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// HTTP API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the server
    pub async fn run(self) -> crate::Result<()> {
        let addr = self.state.config.address();

        let cors = if self.state.config.cors_enabled {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
        };

        // Price endpoints: rate-limited, request-logged, deadline-bounded.
        let price_routes = Router::new()
            .route(
                "/price",
                get(price::current_single_get).post(price::current_single_post),
            )
            .route(
                "/api/v1/price/current",
                get(price::current_single_get).post(price::current_single_post),
            )
            .route(
                "/api/v1/price/current/batch",
                get(price::current_batch_get).post(price::current_batch_post),
            )
            .route(
                "/api/v1/price/historical",
                get(price::historical_single_get).post(price::historical_single_post),
            )
            .route(
                "/api/v1/price/historical/batch",
                get(price::historical_batch_get).post(price::historical_batch_post),
            )
            .route("/price/coins", get(coins::coin_list))
            .route("/price/sync", get(coins::sync_coins))
            .layer(from_fn_with_state(self.state.clone(), request_log))
            .layer(from_fn_with_state(self.state.clone(), rate_limit))
            .layer(from_fn_with_state(self.state.clone(), deadline));

        // Admin surface.
        let admin_routes = Router::new()
            .route("/coins/add", post(coins::add_coin))
            .route("/coins/update/{id}", post(coins::update_coin))
            .route("/coins/delete/{id}", post(coins::delete_coin))
            .route("/coins/refresh", get(coins::refresh_all_coins))
            .route("/coins/refreshList", post(coins::refresh_coin_list))
            .route("/coins/{id}", get(coins::get_coin))
            .route("/redis/delete/{key}", post(coins::delete_redis_key))
            .route("/redis/deletePrefix/{prefix}", post(coins::delete_redis_prefix))
            .route("/appToken", get(app_tokens::list))
            .route("/appToken/add", post(app_tokens::add))
            .route("/appToken/update/{token}", post(app_tokens::update))
            .route("/appToken/delete/{token}", post(app_tokens::delete))
            .route("/appToken/{token}", get(app_tokens::get));

        let app = Router::new()
            .merge(price_routes)
            .merge(admin_routes)
            .route("/k8s/healthz", get(app_tokens::healthz))
            .with_state(self.state)
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        info!(address = %addr, "Starting API server");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::ApiError::Server(e.to_string()))?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| crate::ApiError::Server(e.to_string()))?;

        Ok(())
    }
}
