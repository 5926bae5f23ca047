use std::collections::HashMap;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

/// Iterated-hash work factor for stored passwords.
const HASH_ITERATIONS: u32 = 10_000;

struct UserRecord {
    password_hash: [u8; 32],
    salt: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Credential store: usernames with salted, iterated password hashes.
///
/// The username doubles as the session identity everywhere else in the
/// system. In-memory for now; a database-backed store replaces this behind
/// the same four operations.
pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new user. False when the username is taken or blank.
    pub async fn register(&self, username: &str, password: &str) -> bool {
        if username.trim().is_empty() || password.is_empty() {
            return false;
        }

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return false;
        }

        let salt = uuid::Uuid::new_v4().simple().to_string();
        users.insert(
            username.to_string(),
            UserRecord {
                password_hash: hash_password(password, &salt),
                salt,
                created_at: chrono::Utc::now(),
            },
        );
        true
    }

    /// Verify a username/password pair with a constant-time hash compare.
    pub async fn authenticate(&self, username: &str, password: &str) -> bool {
        let users = self.users.read().await;
        match users.get(username) {
            Some(record) => {
                let candidate = hash_password(password, &record.salt);
                candidate[..].ct_eq(&record.password_hash[..]).into()
            }
            None => false,
        }
    }

    pub async fn exists(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }

    /// Delete a user. False when the username was never registered.
    pub async fn delete(&self, username: &str) -> bool {
        self.users.write().await.remove(username).is_some()
    }

    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn created_at(&self, username: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.users.read().await.get(username).map(|r| r.created_at)
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_password(password: &str, salt: &str) -> [u8; 32] {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..HASH_ITERATIONS {
        digest = Sha256::new()
            .chain_update(salt.as_bytes())
            .chain_update(&digest)
            .finalize();
    }
    digest.into()
}
