//! Maps `VaultError`'s taxonomy onto HTTP status codes at the one boundary
//! where the core's internal errors become a wire response. Shaped after
//! the standard axum anyhow-wrapper idiom: wrap, downcast on the way out.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mvault_core::error::VaultError;

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<VaultError>() {
            let status = match err {
                VaultError::Validation(_) => StatusCode::BAD_REQUEST,
                VaultError::AuthRejected => StatusCode::UNAUTHORIZED,
                VaultError::FileMissing(_) => StatusCode::NOT_FOUND,
                VaultError::FileExists(_) | VaultError::PolicyDenied(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, err.to_string()).into_response();
        }
        if let Some(broker_err) = self.0.downcast_ref::<mvault_core::remote::BrokerError>() {
            let status = match broker_err {
                mvault_core::remote::BrokerError::NoActiveSession => StatusCode::UNAUTHORIZED,
                mvault_core::remote::BrokerError::TaskNotFound => StatusCode::NOT_FOUND,
            };
            return (status, broker_err.to_string()).into_response();
        }
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
