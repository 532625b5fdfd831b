use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tembea_store::redis_repo::rate_limit_key;
use tembea_store::RedisClient;

use crate::state::AppState;

/// Admission check for one caller within the configured window.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, caller: &str, limit: i64, window_seconds: i64) -> anyhow::Result<bool>;
}

#[async_trait]
impl RateLimiter for RedisClient {
    async fn allow(&self, caller: &str, limit: i64, window_seconds: i64) -> anyhow::Result<bool> {
        Ok(self
            .check_rate_limit(&rate_limit_key(caller), limit, window_seconds)
            .await?)
    }
}

/// Fixed-window limit per client address. Limiter trouble lets traffic through.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(req).await;
    };

    let caller = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match limiter
        .allow(&caller, state.rate_limit.requests, state.rate_limit.window_seconds)
        .await
    {
        Ok(true) => next.run(req).await,
        Ok(false) => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response(),
        Err(e) => {
            // Fail open
            tracing::warn!("Rate limiter unavailable: {}", e);
            next.run(req).await
        }
    }
}
