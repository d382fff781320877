use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::{error::AppError, storage::types::user::User};

use crate::{api_state::ApiState, error::ApiError};

/// Authentication token issuance is out of scope for this service (§1): the
/// core receives a verified user identity from whatever sits in front of it.
/// That identity arrives as `X-User-Id`, resolved here into the stored
/// `User` row and attached as an optional extension — optional because
/// `Public`/`Passcode` documents are reachable anonymously.
pub async fn resolve_identity(State(state): State<ApiState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let user = match extract_user_id(&request) {
        Some(user_id) => state
            .db
            .get_item::<User>(&user_id)
            .await
            .map_err(AppError::from)
            .map_err(ApiError::from)?,
        None => None,
    };

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn extract_user_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
}
