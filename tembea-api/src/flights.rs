use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tembea_core::UnitKey;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SeatMap {
    pub flight_number: String,
    pub capacity: i32,
    pub available: i32,
    pub seats: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/flights/{flight_number}/seats", get(available_seats))
}

/// GET /v1/flights/{flight_number}/seats
async fn available_seats(
    State(state): State<AppState>,
    Path(flight_number): Path<String>,
) -> Result<Json<SeatMap>, AppError> {
    let key = UnitKey::flight(flight_number.as_str());
    let inventory = state.reservations.inventory();

    let availability = inventory.availability(&key).await?;
    let seats = inventory.available_slots(&key).await?;

    Ok(Json(SeatMap {
        flight_number: flight_number.trim().to_uppercase(),
        capacity: availability.capacity,
        available: availability.available,
        seats,
    }))
}
