use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::{auth, handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route(
            "/api/user/orders",
            post(handlers::orders::submit_order).get(handlers::orders::list_orders),
        )
        .route("/api/user/balance", get(handlers::balance::get_balance))
        .route(
            "/api/user/balance/withdraw",
            post(handlers::balance::withdraw),
        )
        .route(
            "/api/user/withdrawals",
            get(handlers::balance::list_withdrawals),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    Router::new()
        .route("/api/user/register", post(handlers::users::register))
        .route("/api/user/login", post(handlers::users::login))
        .merge(protected)
        .with_state(state)
        .layer(cors)
}
