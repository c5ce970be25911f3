use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{MessageResponse, StoreError};
use tracing::warn;

/// Errores de los handlers HTTP.
///
/// `Store` responde con el `StoreError` serializado para que el worker pueda
/// reconstruirlo; el resto responde `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    UnsupportedMediaType(String),
    Store(StoreError),
    Internal(String),
}

impl ApiError {
    pub fn internal(e: impl std::fmt::Display) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (
        status,
        Json(MessageResponse {
            message: text.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => message(StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => message(StatusCode::UNAUTHORIZED, "API key inválida o ausente"),
            ApiError::NotFound(msg) => message(StatusCode::NOT_FOUND, msg),
            ApiError::UnsupportedMediaType(msg) => message(StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::Store(e) => {
                let status = match &e {
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::Duplicate(_) | StoreError::InvalidTransition { .. } => {
                        StatusCode::CONFLICT
                    }
                    StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, Json(e)).into_response()
            }
            ApiError::Internal(msg) => {
                warn!("error interno: {}", msg);
                message(StatusCode::INTERNAL_SERVER_ERROR, "Error interno del servidor")
            }
        }
    }
}
