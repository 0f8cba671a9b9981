use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;

use crate::api::state::AppState;
use crate::api::types::{parse_json, Credentials};
use crate::error::{Result, ScripError};

/// POST /api/user/register
///
/// Registers a login/password pair and authenticates immediately: the bearer
/// token is returned both in the Authorization header and as the body.
pub async fn register(
    State(state): State<AppState>,
    body: String,
) -> Result<impl IntoResponse> {
    let creds: Credentials = parse_json(&body)?;
    require_credentials(&creds)?;

    let user = state
        .with_deadline(state.users.register(&creds.login, &creds.password))
        .await?;

    bearer_response(&state, &user.login)
}

/// POST /api/user/login
pub async fn login(State(state): State<AppState>, body: String) -> Result<impl IntoResponse> {
    let creds: Credentials = parse_json(&body)?;
    require_credentials(&creds)?;

    let user = state
        .with_deadline(state.users.authenticate(&creds.login, &creds.password))
        .await?;

    bearer_response(&state, &user.login)
}

fn require_credentials(creds: &Credentials) -> Result<()> {
    if creds.login.is_empty() || creds.password.is_empty() {
        return Err(ScripError::Validation(
            "Login and password are required".to_string(),
        ));
    }
    Ok(())
}

fn bearer_response(state: &AppState, login: &str) -> Result<impl IntoResponse> {
    let token = state.tokens.issue(login)?;
    let bearer = format!("Bearer {token}");
    Ok(([(AUTHORIZATION, bearer.clone())], bearer))
}
