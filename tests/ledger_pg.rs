//! Ledger and pipeline behavior against a real PostgreSQL instance.
//!
//! These tests need a database; they skip themselves when neither
//! `DATABASE_URL` nor `DATABASE_URI` is set. Every test works with its own
//! users and freshly generated order identifiers, so a shared database stays
//! usable across runs.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use scrip::adapters::{AccrualClient, PostgresStore};
use scrip::domain::{Order, OrderStatus};
use scrip::error::ScripError;
use scrip::services::{
    OrderAdmission, OrderProcessor, OrderService, RetryBuffer, UserService, WalletService,
    WithdrawalService,
};

async fn connect() -> Option<Arc<PostgresStore>> {
    let url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URI"))
        .ok()?;
    let store = PostgresStore::new(&url, 5).await.ok()?;
    store.migrate().await.ok()?;
    Some(Arc::new(store))
}

macro_rules! require_database {
    () => {
        match connect().await {
            Some(store) => store,
            None => {
                eprintln!("skipping: set DATABASE_URL to run ledger tests");
                return;
            }
        }
    };
}

fn unique_login(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// A fresh Luhn-valid identifier so reruns never collide on the global
/// order-id namespace.
fn unique_order_id() -> String {
    let mut payload = Uuid::new_v4().as_u128().to_string();
    payload.truncate(15);
    format!("{payload}{}", luhn_check_digit(&payload))
}

fn luhn_check_digit(payload: &str) -> u32 {
    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    (10 - (sum % 10)) % 10
}

#[tokio::test]
async fn test_registration_creates_zeroed_wallet() {
    let store = require_database!();
    let users = UserService::new(store.clone());
    let wallet = WalletService::new(store.clone());

    let login = unique_login("reg");
    let user = users.register(&login, "hunter2").await.unwrap();

    let balance = wallet.balance(user.uuid).await.unwrap();
    assert_eq!(balance.current, dec!(0));
    assert_eq!(balance.withdrawn, dec!(0));

    let err = users.register(&login, "other-pw").await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    let authed = users.authenticate(&login, "hunter2").await.unwrap();
    assert_eq!(authed.uuid, user.uuid);
    assert!(users.authenticate(&login, "wrong").await.is_err());
}

#[tokio::test]
async fn test_admission_is_three_way() {
    let store = require_database!();
    let users = UserService::new(store.clone());
    let (queue_tx, mut queue_rx) = mpsc::channel(10);
    let orders = OrderService::new(store.clone(), queue_tx);

    let u1 = users.register(&unique_login("adm1"), "pw").await.unwrap();
    let u2 = users.register(&unique_login("adm2"), "pw").await.unwrap();
    let order_id = unique_order_id();

    let first = orders.submit_order(&order_id, u1.uuid).await.unwrap();
    assert!(matches!(first, OrderAdmission::New(_)));
    assert_eq!(queue_rx.recv().await.unwrap().id, order_id);

    let repeat = orders.submit_order(&order_id, u1.uuid).await.unwrap();
    assert!(matches!(repeat, OrderAdmission::Duplicate));

    let conflict = orders.submit_order(&order_id, u2.uuid).await.unwrap_err();
    assert!(matches!(conflict, ScripError::OrderOwnedByOther));

    let err = orders.submit_order("79927398710", u1.uuid).await.unwrap_err();
    assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn test_withdrawal_debits_and_lists_oldest_first() {
    let store = require_database!();
    let users = UserService::new(store.clone());
    let wallet = WalletService::new(store.clone());
    let withdrawals = WithdrawalService::new(store.clone());

    let user = users.register(&unique_login("wd"), "pw").await.unwrap();

    let mut tx = store.begin().await.unwrap();
    wallet.credit(&mut tx, user.uuid, dec!(500)).await.unwrap();
    tx.commit().await.unwrap();

    let first_order = unique_order_id();
    let second_order = unique_order_id();
    withdrawals
        .create_withdrawal(user.uuid, &first_order, dec!(120.5))
        .await
        .unwrap();
    withdrawals
        .create_withdrawal(user.uuid, &second_order, dec!(30))
        .await
        .unwrap();

    let balance = wallet.balance(user.uuid).await.unwrap();
    assert_eq!(balance.current, dec!(349.5));
    assert_eq!(balance.withdrawn, dec!(150.5));

    let listed = withdrawals.withdrawals_for_user(user.uuid).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].order_id, first_order);
    assert_eq!(listed[1].order_id, second_order);
}

#[tokio::test]
async fn test_withdrawal_exceeding_balance_changes_nothing() {
    let store = require_database!();
    let users = UserService::new(store.clone());
    let wallet = WalletService::new(store.clone());
    let withdrawals = WithdrawalService::new(store.clone());

    let user = users.register(&unique_login("poor"), "pw").await.unwrap();

    let mut tx = store.begin().await.unwrap();
    wallet.credit(&mut tx, user.uuid, dec!(50)).await.unwrap();
    tx.commit().await.unwrap();

    let err = withdrawals
        .create_withdrawal(user.uuid, &unique_order_id(), dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ScripError::InsufficientFunds));
    assert_eq!(err.status_code(), 402);

    let balance = wallet.balance(user.uuid).await.unwrap();
    assert_eq!(balance.current, dec!(50));
    assert_eq!(balance.withdrawn, dec!(0));
    assert!(withdrawals
        .withdrawals_for_user(user.uuid)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_settled_order_credits_exactly_once() {
    let store = require_database!();
    let users = UserService::new(store.clone());
    let wallet = WalletService::new(store.clone());

    let user = users.register(&unique_login("once"), "pw").await.unwrap();
    let mut order = Order::new(unique_order_id(), user.uuid);
    store.insert_order(&order).await.unwrap();

    order.status = OrderStatus::Processed;
    order.accrual = Some(dec!(500));

    let mut tx = store.begin().await.unwrap();
    let applied = store.update_order(&mut tx, &order).await.unwrap();
    assert_eq!(applied, 1);
    store
        .credit_wallet(&mut tx, user.uuid, dec!(500))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // A duplicate delivery of the same terminal transition applies nothing.
    let mut tx = store.begin().await.unwrap();
    let applied = store.update_order(&mut tx, &order).await.unwrap();
    assert_eq!(applied, 0);
    tx.rollback().await.unwrap();

    let balance = wallet.balance(user.uuid).await.unwrap();
    assert_eq!(balance.current, dec!(500));
}

#[tokio::test]
async fn test_recovery_requeues_unfinished_orders() {
    let store = require_database!();
    let users = UserService::new(store.clone());

    let user = users.register(&unique_login("rec"), "pw").await.unwrap();
    let mut submitted = Vec::new();
    for _ in 0..25 {
        let order = Order::new(unique_order_id(), user.uuid);
        store.insert_order(&order).await.unwrap();
        submitted.push(order.id);
    }

    let (queue_tx, mut queue_rx) = mpsc::channel(10_000);
    let oracle = Arc::new(
        AccrualClient::new("http://127.0.0.1:9", 6000, Duration::from_millis(100)).unwrap(),
    );
    let retries = RetryBuffer::start(
        Duration::from_secs(60),
        Duration::from_secs(300),
        queue_tx.clone(),
    );
    let processor = OrderProcessor::new(store.clone(), oracle, retries, queue_tx);

    let published = processor.recover_unfinished().await.unwrap();
    assert!(published >= submitted.len());

    let mut recovered = std::collections::HashSet::new();
    while let Ok(order) = queue_rx.try_recv() {
        recovered.insert(order.id);
    }
    for id in &submitted {
        assert!(recovered.contains(id), "order {id} was not re-queued");
    }
}

async fn spawn_flaky_oracle(failures_before_success: u32) -> SocketAddr {
    let counter = Arc::new(AtomicU32::new(0));
    let router = Router::new().route(
        "/api/orders/:id",
        get(move |Path(id): Path<String>| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < failures_before_success {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    axum::Json(serde_json::json!({
                        "order": id,
                        "status": "PROCESSED",
                        "accrual": 100
                    }))
                    .into_response()
                }
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_pipeline_retries_until_settled() {
    let store = require_database!();
    let users = UserService::new(store.clone());
    let wallet = WalletService::new(store.clone());

    let user = users.register(&unique_login("e2e"), "pw").await.unwrap();

    // The oracle fails twice before settling the order with 100 points, so
    // settlement requires two passes through the retry buffer.
    let oracle_addr = spawn_flaky_oracle(2).await;
    let oracle = Arc::new(
        AccrualClient::new(
            &format!("http://{oracle_addr}"),
            6000,
            Duration::from_secs(2),
        )
        .unwrap(),
    );

    let (queue_tx, queue_rx) = mpsc::channel(100);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retries = RetryBuffer::start(
        Duration::from_millis(100),
        Duration::from_secs(300),
        queue_tx.clone(),
    );
    let processor = OrderProcessor::new(store.clone(), oracle, retries, queue_tx.clone());
    let processor_handle = tokio::spawn(processor.run(queue_rx, shutdown_rx));

    let orders = OrderService::new(store.clone(), queue_tx);
    let order_id = unique_order_id();
    orders.submit_order(&order_id, user.uuid).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let order = store.find_order(&order_id).await.unwrap().unwrap();
        if order.status == OrderStatus::Processed {
            assert_eq!(order.accrual, Some(dec!(100)));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order stuck in {:?}",
            order.status
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let balance = wallet.balance(user.uuid).await.unwrap();
    assert_eq!(balance.current, dec!(100));

    shutdown_tx.send(true).unwrap();
    let _ = processor_handle.await;
}
