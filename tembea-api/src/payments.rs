use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tembea_core::{Payment, PaymentMethod};
use tembea_order::{PaymentSession, ReconcileError};
use uuid::Uuid;

use crate::bookings::owned_booking;
use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: Uuid,
    pub method: PaymentMethod,
    /// M-Pesa number to push the prompt to.
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(initiate_payment))
        .route("/v1/payments/{reference}/verify", get(verify_payment))
}

/// POST /v1/payments
async fn initiate_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentSession>), AppError> {
    owned_booking(&state, &claims, req.booking_id).await?;

    let session = state
        .reconciler
        .initiate(req.booking_id, req.method, req.phone)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /v1/payments/{reference}/verify
async fn verify_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reference): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<Payment>, AppError> {
    let not_found = || AppError::from(ReconcileError::PaymentNotFound(reference.clone()));
    let owned = |payment: &Payment| {
        payment
            .requester
            .as_ref()
            .is_some_and(|r| r.user_id == claims.sub)
    };

    // Refuse to poll the provider for somebody else's reference
    match state.reconciler.get(&reference).await {
        Ok(stored) if !owned(&stored) => return Err(not_found()),
        Ok(_) | Err(ReconcileError::PaymentNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let payment = state.reconciler.verify(&reference, query.method).await?;
    if !owned(&payment) {
        return Err(not_found());
    }
    Ok(Json(payment))
}
