use crate::models::AppToken;
use crate::pool::DatabasePool;
use crate::Result;
use proxy_redis::{keys, RedisConnection};
use sqlx::Postgres;
use std::time::Duration;

const TOKEN_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const TOKEN_CACHE_TTL_AFTER_WRITE: Duration = Duration::from_secs(10 * 60);

fn token_cache_key(token: &str) -> String {
    format!("app_token:{}", token)
}

/// API-key store with a small read cache.
#[derive(Clone)]
pub struct AppTokenRepository {
    db: DatabasePool,
    redis: RedisConnection,
}

impl AppTokenRepository {
    pub fn new(db: DatabasePool, redis: RedisConnection) -> Self {
        Self { db, redis }
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Option<AppToken>> {
        let cache_key = token_cache_key(token);
        if let Some(app_token) = self.redis.get_json::<AppToken>(&cache_key).await? {
            return Ok(Some(app_token));
        }

        let app_token = sqlx::query_as::<Postgres, AppToken>(
            "SELECT name, token, rate FROM app_tokens WHERE token = $1 AND deleted_at IS NULL",
        )
        .bind(token)
        .fetch_optional(self.db.inner())
        .await?;

        if let Some(app_token) = &app_token {
            self.redis
                .set_json(&cache_key, app_token, TOKEN_CACHE_TTL)
                .await
                .ok();
        }
        Ok(app_token)
    }

    pub async fn get_all(&self) -> Result<Vec<AppToken>> {
        let tokens = sqlx::query_as::<Postgres, AppToken>(
            "SELECT name, token, rate FROM app_tokens WHERE deleted_at IS NULL",
        )
        .fetch_all(self.db.inner())
        .await?;
        Ok(tokens)
    }

    pub async fn add(&self, app_token: &AppToken) -> Result<()> {
        sqlx::query("INSERT INTO app_tokens (name, token, rate) VALUES ($1, $2, $3)")
            .bind(&app_token.name)
            .bind(&app_token.token)
            .bind(app_token.rate)
            .execute(self.db.inner())
            .await?;
        self.redis
            .set_json(
                &token_cache_key(&app_token.token),
                app_token,
                TOKEN_CACHE_TTL_AFTER_WRITE,
            )
            .await
            .ok();
        Ok(())
    }

    pub async fn update(&self, app_token: &AppToken) -> Result<()> {
        self.redis.delete(&token_cache_key(&app_token.token)).await.ok();
        self.redis
            .delete(&keys::rate_limit_key(&app_token.token))
            .await
            .ok();

        sqlx::query("UPDATE app_tokens SET name = $1, rate = $2, updated_at = NOW() WHERE token = $3")
            .bind(&app_token.name)
            .bind(app_token.rate)
            .bind(&app_token.token)
            .execute(self.db.inner())
            .await?;

        self.redis
            .set_json(
                &token_cache_key(&app_token.token),
                app_token,
                TOKEN_CACHE_TTL_AFTER_WRITE,
            )
            .await
            .ok();
        Ok(())
    }

    pub async fn delete(&self, token: &str) -> Result<()> {
        self.redis.delete(&token_cache_key(token)).await.ok();
        self.redis.delete(&keys::rate_limit_key(token)).await.ok();

        sqlx::query("UPDATE app_tokens SET deleted_at = NOW() WHERE token = $1")
            .bind(token)
            .execute(self.db.inner())
            .await?;
        Ok(())
    }
}
