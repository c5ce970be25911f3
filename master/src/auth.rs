use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::API_KEY_HEADER;

use crate::error::ApiError;
use crate::state::AppState;

/// Exige el header `x-api-key` con la clave configurada.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided != Some(state.config.api_key.as_str()) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}
