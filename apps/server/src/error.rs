use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stallplass_core::errors::Error as CoreError;
use stallplass_core::payments::PaymentError;
use stallplass_core::rentals::RentalError;
use stallplass_reconcile::ReconcileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("{0}")]
    Reconcile(#[from] ReconcileError),
    #[error("Not Found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

fn core_status(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Payment(PaymentError::NotFound(_)) => StatusCode::NOT_FOUND,
        CoreError::Payment(_) => StatusCode::CONFLICT,
        CoreError::Rental(RentalError::NotFound(_)) => StatusCode::NOT_FOUND,
        CoreError::Rental(_) => StatusCode::CONFLICT,
        CoreError::Provider(_) => StatusCode::BAD_GATEWAY,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Core(e) => core_status(e),
            ApiError::Reconcile(e) => match e {
                ReconcileError::InvalidConfig(_) | ReconcileError::MissingField(_) => {
                    StatusCode::BAD_REQUEST
                }
                ReconcileError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
                ReconcileError::Provider(_) => StatusCode::BAD_GATEWAY,
                ReconcileError::Core(core) => core_status(core),
            },
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
