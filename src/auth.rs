use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
const HASH_SCHEME: &str = "sha256";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("用户名或密码错误！")]
    InvalidCredentials,
    #[error("failed to read users: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Authenticated identity carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub role: String,
}

/// Produces `sha256$<salt>$<hex digest of salt || password>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = salted_digest(&salt, password);
    format!("{HASH_SCHEME}${salt}${digest}")
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    scheme == HASH_SCHEME && salted_digest(salt, password) == expected
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn ensure_default_admin(conn: &Connection) -> rusqlite::Result<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [DEFAULT_ADMIN_USERNAME],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if exists {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO users(username, password_hash, role) VALUES(?, ?, 'admin')",
        (DEFAULT_ADMIN_USERNAME, hash_password(DEFAULT_ADMIN_PASSWORD)),
    )?;
    tracing::info!(username = DEFAULT_ADMIN_USERNAME, "seeded default account");
    Ok(())
}

pub fn authenticate(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<Session, AuthError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT password_hash, role FROM users WHERE username = ?",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match row {
        Some((hash, role)) if verify_password(&hash, password) => Ok(Session {
            username: username.to_string(),
            role,
        }),
        _ => Err(AuthError::InvalidCredentials),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip_and_salting() {
        let a = hash_password("secret");
        let b = hash_password("secret");
        assert_ne!(a, b, "salts must differ");
        assert!(verify_password(&a, "secret"));
        assert!(!verify_password(&a, "Secret"));
        assert!(!verify_password("plain-text", "plain-text"));
    }
}
