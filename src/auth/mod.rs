pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

use crate::{error::AppError, state::AppState};

/// The verified token identity. Only the user id is trusted; role and
/// company context are re-loaded from the database on every command.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::authorization("missing or invalid bearer token"))?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::authorization("missing or invalid bearer token"))?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
        })
    }
}
