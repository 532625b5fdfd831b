use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tembea_core::{BookingError, CoreError, StoreError};
use tembea_order::ReconcileError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    UnprocessableError(String),
    ServiceUnavailable(String),
    BadGateway(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::UnprocessableError(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::BadGateway(msg) => {
                tracing::error!("Bad gateway: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            other => AppError::Anyhow(other.into()),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::UnitNotFound(_) | BookingError::NotFound(_) => {
                AppError::NotFoundError(err.to_string())
            }
            BookingError::CapacityExceeded { .. }
            | BookingError::AlreadyAllocated { .. }
            | BookingError::AlreadyProcessed { .. } => AppError::ConflictError(err.to_string()),
            BookingError::InvalidTransition { .. } => AppError::UnprocessableError(err.to_string()),
            BookingError::InvalidAllocation(_) => AppError::ValidationError(err.to_string()),
            BookingError::Store(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::GatewayUnavailable(_) => AppError::ServiceUnavailable(err.to_string()),
            ReconcileError::GatewayRejected(_) => AppError::UnprocessableError(err.to_string()),
            ReconcileError::MethodNotConfigured(_) => AppError::ValidationError(err.to_string()),
            ReconcileError::InvalidPayload(_) => AppError::BadGateway(err.to_string()),
            ReconcileError::InvalidSignature => AppError::AuthenticationError(err.to_string()),
            ReconcileError::UnresolvableReference(_) | ReconcileError::PaymentNotFound(_) => {
                AppError::NotFoundError(err.to_string())
            }
            ReconcileError::PaymentInProgress(_) => AppError::ConflictError(err.to_string()),
            ReconcileError::Booking(e) => e.into(),
            ReconcileError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tembea_core::{BookingEvent, BookingStatus};

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            status_of(BookingError::AlreadyAllocated { unit: "flight:FL100".into(), slot: "12A".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(BookingError::InvalidTransition {
                from: BookingStatus::Pending,
                event: BookingEvent::CheckIn
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ReconcileError::GatewayUnavailable("timed out".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(BookingError::Store(StoreError::Backend("boom".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
