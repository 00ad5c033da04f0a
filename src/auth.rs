use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::coordinator::AppState;

/// Extractor that rejects requests without the configured bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthBearer;

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthBearer {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        let token = header.strip_prefix("Bearer ").ok_or(StatusCode::UNAUTHORIZED)?;
        if !state.cfg.auth.token.is_empty() && token == state.cfg.auth.token {
            Ok(Self)
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
