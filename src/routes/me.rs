use axum::{extract::State, Json};

use crate::auth::AuthenticatedUser;
use crate::context::{load_context, CallerContext};
use crate::error::AppResult;
use crate::state::AppState;

/// The caller's resolved identity, role and department. The frontend
/// drives its navigation off this instead of decoding the token.
pub async fn whoami(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<CallerContext>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(ctx))
}
