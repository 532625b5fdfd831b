use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tembea_core::{Booking, UnitKey};
use tembea_order::ReservationRequest;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

/// What to book: a seat on a flight, or a room at a place for a date range.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitRequest {
    Flight {
        flight_number: String,
    },
    Place {
        place_id: i64,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    #[serde(flatten)]
    pub unit: UnitRequest,
    /// Seat number or room label; assigned when omitted.
    #[serde(default, alias = "seat_number", alias = "room")]
    pub slot: Option<String>,
    #[serde(default)]
    pub guests: Option<u32>,
}

impl UnitRequest {
    fn key(&self) -> Result<UnitKey, AppError> {
        match self {
            UnitRequest::Flight { flight_number } => {
                if flight_number.trim().is_empty() {
                    return Err(AppError::ValidationError("flight_number is required".to_string()));
                }
                Ok(UnitKey::flight(flight_number.as_str()))
            }
            UnitRequest::Place {
                place_id,
                check_in,
                check_out,
            } => Ok(UnitKey::place(*place_id, *check_in, *check_out)?),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/check-in", post(check_in_booking))
}

/// Loads a booking the caller owns. Someone else's booking looks like a missing one.
pub(crate) async fn owned_booking(
    state: &AppState,
    claims: &CustomerClaims,
    id: Uuid,
) -> Result<Booking, AppError> {
    let booking = state.lifecycle.get(id).await?;
    if booking.requester.user_id != claims.sub {
        return Err(AppError::NotFoundError(format!("Booking not found: {}", id)));
    }
    Ok(booking)
}

/// POST /v1/bookings
async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let request = ReservationRequest {
        unit: req.unit.key()?,
        requester: claims.requester(),
        slot: req.slot.filter(|s| !s.trim().is_empty()),
        guests: req.guests,
    };

    let booking = state.reservations.reserve(request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /v1/bookings
async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.lifecycle.list_for(&claims.sub).await?))
}

/// GET /v1/bookings/{id}
async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(owned_booking(&state, &claims, id).await?))
}

/// POST /v1/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    owned_booking(&state, &claims, id).await?;
    Ok(Json(state.lifecycle.cancel(id).await?))
}

/// POST /v1/bookings/{id}/check-in
async fn check_in_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    owned_booking(&state, &claims, id).await?;
    Ok(Json(state.lifecycle.check_in(id).await?))
}
