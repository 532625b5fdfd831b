use axum::{http::Method, middleware::from_fn_with_state, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod flights;
pub mod gateways;
pub mod metrics;
pub mod middleware;
pub mod payments;
pub mod state;
pub mod webhooks;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Requester-scoped routes sit behind the bearer token
    let customer = Router::new()
        .merge(bookings::routes())
        .merge(payments::routes())
        .layer(from_fn_with_state(
            state.clone(),
            middleware::customer_auth_middleware,
        ));

    // Provider webhooks are always acknowledged, so they stay outside the limiter
    let limited = Router::new()
        .merge(customer)
        .merge(flights::routes())
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware));

    Router::new()
        .merge(limited)
        .merge(webhooks::routes())
        .route("/metrics", get(metrics::metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
