use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::PostgresStore;
use crate::domain::User;
use crate::error::{Result, ScripError};

/// Account management: registration and credential checks.
pub struct UserService {
    store: Arc<PostgresStore>,
}

impl UserService {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }

    /// Register a new account. The user row and its wallet are created in one
    /// transaction so no account can exist without a wallet.
    pub async fn register(&self, login: &str, password: &str) -> Result<User> {
        let user = User {
            uuid: Uuid::new_v4(),
            login: login.to_string(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        self.store.create_user(&mut tx, &user).await?;
        self.store.create_wallet(&mut tx, user.uuid).await?;
        tx.commit().await?;

        Ok(user)
    }

    /// Check credentials. Unknown login and wrong password are reported the
    /// same way so the response does not reveal which accounts exist.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User> {
        let user = self
            .store
            .find_user_by_login(login)
            .await?
            .ok_or_else(|| ScripError::Auth("Invalid login or password".to_string()))?;

        if verify_password(&user.password_hash, password)? {
            Ok(user)
        } else {
            Err(ScripError::Auth("Invalid login or password".to_string()))
        }
    }

    pub async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        self.store.find_user_by_login(login).await
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ScripError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(stored_hash: &str, provided: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ScripError::Internal(format!("invalid stored password hash: {e}")))?;

    match Argon2::default().verify_password(provided.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(ScripError::Internal(format!(
            "password verification failed: {e}"
        ))),
    }
}
