use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus, User, Wallet, Withdrawal};
use crate::error::{Result, ScripError};

/// PostgreSQL storage adapter. The store exclusively owns all persisted
/// entities; callers hold transient copies only.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction for a composite write. Rolls back on drop unless
    /// committed.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // ==================== Users ====================

    /// Insert a user inside the caller's transaction, so wallet creation can
    /// join the same atomic unit.
    pub async fn create_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user: &User,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (uuid, login, password_hash, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user.uuid)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ScripError::Conflict("Login already taken".to_string())
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT uuid, login, password_hash, created_at
            FROM users WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| User {
            uuid: r.get("uuid"),
            login: r.get("login"),
            password_hash: r.get("password_hash"),
            created_at: r.get("created_at"),
        }))
    }

    // ==================== Orders ====================

    pub async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_uuid, status, created_at, updated_at)
            VALUES ($1, $2, $3::order_status, $4, $5)
            "#,
        )
        .bind(&order.id)
        .bind(order.user_uuid)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ScripError::Conflict("Order already exists".to_string())
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_uuid, status::text AS status, accrual, created_at, updated_at
            FROM orders WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| order_from_row(&r)).transpose()
    }

    /// All orders of one user, newest first.
    pub async fn orders_for_user(&self, user_uuid: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_uuid, status::text AS status, accrual, created_at, updated_at
            FROM orders
            WHERE user_uuid = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_uuid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    /// Update status/accrual inside the caller's transaction so the wallet
    /// credit lands in the same atomic unit. Only non-terminal rows are
    /// touched; the returned count is 0 when the order already settled, which
    /// lets a duplicate delivery skip the credit instead of applying it twice.
    pub async fn update_order(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1::order_status, accrual = $2, updated_at = $3
            WHERE id = $4 AND status NOT IN ('INVALID', 'PROCESSED')
            "#,
        )
        .bind(order.status.as_str())
        .bind(order.accrual)
        .bind(order.updated_at)
        .bind(&order.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                ScripError::Validation("accrual amount must be positive".to_string())
            } else {
                ScripError::from(e)
            }
        })?;

        Ok(result.rows_affected())
    }

    pub async fn count_unfinished_orders(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"SELECT count(*) AS cnt FROM orders WHERE status IN ('NEW', 'PROCESSING')"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("cnt"))
    }

    /// One page of orders still awaiting a terminal status, oldest first so
    /// recovery replays admission order.
    pub async fn unfinished_orders_page(&self, limit: i64, offset: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_uuid, status::text AS status, accrual, created_at, updated_at
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    // ==================== Wallets ====================

    pub async fn create_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_uuid: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_uuid, credits, debits, created_at, updated_at)
            VALUES ($1, 0, 0, $2, $2)
            "#,
        )
        .bind(user_uuid)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ScripError::Conflict("Wallet already exists".to_string())
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn wallet_for_user(&self, user_uuid: Uuid) -> Result<Wallet> {
        let row = sqlx::query(
            r#"
            SELECT id, user_uuid, credits, debits, created_at, updated_at
            FROM wallets WHERE user_uuid = $1
            "#,
        )
        .bind(user_uuid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(wallet_from_row(&r)),
            None => Err(ScripError::NotFound("wallet".to_string())),
        }
    }

    /// Accumulate an accrual. The UPDATE takes the row lock, serialising
    /// concurrent ledger writes for the same user.
    pub async fn credit_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_uuid: Uuid,
        amount: Decimal,
    ) -> Result<Wallet> {
        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET credits = credits + $1, updated_at = $2
            WHERE user_uuid = $3
            RETURNING id, user_uuid, credits, debits, created_at, updated_at
            "#,
        )
        .bind(amount)
        .bind(Utc::now())
        .bind(user_uuid)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                ScripError::Validation("credit amount must be positive".to_string())
            } else {
                ScripError::from(e)
            }
        })?;

        match row {
            Some(r) => Ok(wallet_from_row(&r)),
            None => Err(ScripError::NotFound("wallet".to_string())),
        }
    }

    /// Accumulate a withdrawal. Balance non-negativity is the caller's check,
    /// made inside the same transaction against the returned row.
    pub async fn debit_wallet(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_uuid: Uuid,
        amount: Decimal,
    ) -> Result<Wallet> {
        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET debits = debits + $1, updated_at = $2
            WHERE user_uuid = $3
            RETURNING id, user_uuid, credits, debits, created_at, updated_at
            "#,
        )
        .bind(amount)
        .bind(Utc::now())
        .bind(user_uuid)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                ScripError::Validation("withdrawal amount must be positive".to_string())
            } else {
                ScripError::from(e)
            }
        })?;

        match row {
            Some(r) => Ok(wallet_from_row(&r)),
            None => Err(ScripError::NotFound("wallet".to_string())),
        }
    }

    // ==================== Withdrawals ====================

    pub async fn insert_withdrawal(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        withdrawal: &Withdrawal,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO withdrawals (user_uuid, order_id, amount, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(withdrawal.user_uuid)
        .bind(&withdrawal.order_id)
        .bind(withdrawal.amount)
        .bind(withdrawal.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                ScripError::Validation("withdrawal amount must be positive".to_string())
            } else {
                ScripError::from(e)
            }
        })?;

        Ok(row.get("id"))
    }

    /// All withdrawals of one user, oldest first.
    pub async fn withdrawals_for_user(&self, user_uuid: Uuid) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_uuid, order_id, amount, created_at
            FROM withdrawals
            WHERE user_uuid = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Withdrawal {
                id: Some(r.get("id")),
                user_uuid: r.get("user_uuid"),
                order_id: r.get("order_id"),
                amount: r.get("amount"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let status: String = row.get("status");
    Ok(Order {
        id: row.get("id"),
        user_uuid: row.get("user_uuid"),
        status: OrderStatus::try_from(status.as_str())?,
        accrual: row.get::<Option<Decimal>, _>("accrual"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn wallet_from_row(row: &PgRow) -> Wallet {
    Wallet {
        id: row.get("id"),
        user_uuid: row.get("user_uuid"),
        credits: row.get("credits"),
        debits: row.get("debits"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23514"))
}
