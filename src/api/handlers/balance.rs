use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use rust_decimal::Decimal;

use crate::api::auth::AuthedUser;
use crate::api::state::AppState;
use crate::api::types::{parse_json, BalanceView, WithdrawRequest, WithdrawalView};
use crate::error::{Result, ScripError};

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(AuthedUser(user_uuid)): Extension<AuthedUser>,
) -> Result<Json<BalanceView>> {
    let balance = state.with_deadline(state.wallet.balance(user_uuid)).await?;

    Ok(Json(BalanceView::from(balance)))
}

/// POST /api/user/balance/withdraw
///
/// Pays for a future external purchase with points. 402 when the balance
/// would go negative.
pub async fn withdraw(
    State(state): State<AppState>,
    Extension(AuthedUser(user_uuid)): Extension<AuthedUser>,
    body: String,
) -> Result<StatusCode> {
    let request: WithdrawRequest = parse_json(&body)?;
    let amount = Decimal::try_from(request.sum)
        .map_err(|_| ScripError::Validation("Invalid withdrawal amount".to_string()))?;

    state
        .with_deadline(
            state
                .withdrawals
                .create_withdrawal(user_uuid, &request.order, amount),
        )
        .await?;

    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals
///
/// The user's withdrawals, oldest first; 204 when there are none.
pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(AuthedUser(user_uuid)): Extension<AuthedUser>,
) -> Result<Response> {
    let withdrawals = state
        .with_deadline(state.withdrawals.withdrawals_for_user(user_uuid))
        .await?;

    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let views: Vec<WithdrawalView> = withdrawals.into_iter().map(WithdrawalView::from).collect();
    Ok(Json(views).into_response())
}
