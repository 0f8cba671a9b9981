use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::error::ScripError;

/// Authenticated caller, inserted into request extensions by the middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub Uuid);

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
}

/// Verify the bearer token, then resolve its login to an account row. The
/// token is not trusted to carry the user identifier by itself.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ScripError> {
    let token = bearer_from_headers(req.headers())
        .ok_or_else(|| ScripError::Auth("Missing bearer token".to_string()))?;

    let login = state.tokens.verify(token)?;

    let user = state
        .with_deadline(state.users.find_by_login(&login))
        .await?
        .ok_or_else(|| ScripError::Auth("Unknown user".to_string()))?;

    req.extensions_mut().insert(AuthedUser(user.uuid));
    Ok(next.run(req).await)
}
