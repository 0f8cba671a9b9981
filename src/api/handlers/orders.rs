use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};

use crate::api::auth::AuthedUser;
use crate::api::state::AppState;
use crate::api::types::OrderView;
use crate::error::Result;
use crate::services::OrderAdmission;

/// POST /api/user/orders
///
/// Body is the raw order identifier (text/plain). 202 for a new admission,
/// 200 when the same user re-submits an identifier they already own.
pub async fn submit_order(
    State(state): State<AppState>,
    Extension(AuthedUser(user_uuid)): Extension<AuthedUser>,
    body: String,
) -> Result<StatusCode> {
    let admission = state
        .with_deadline(state.orders.submit_order(body.trim(), user_uuid))
        .await?;

    Ok(match admission {
        OrderAdmission::New(_) => StatusCode::ACCEPTED,
        OrderAdmission::Duplicate => StatusCode::OK,
    })
}

/// GET /api/user/orders
///
/// The user's submissions, newest first; 204 when there are none.
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(AuthedUser(user_uuid)): Extension<AuthedUser>,
) -> Result<Response> {
    let orders = state
        .with_deadline(state.orders.orders_for_user(user_uuid))
        .await?;

    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let views: Vec<OrderView> = orders.into_iter().map(OrderView::from).collect();
    Ok(Json(views).into_response())
}
