use crate::common::crypto;
use crate::common::models::Session;
use crate::server::config::ServerConfig;
use crate::server::database::{Database, now_millis};
use crate::server::error::{ServiceError, ServiceResult};
use std::sync::Arc;
use sqlx::Row;
use log::{info, warn};

const MIN_PASSWORD_LEN: usize = 6;
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !email.contains(char::is_whitespace)
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn normalize_email(email: &str) -> ServiceResult<String> {
    let email = email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return Err(ServiceError::InvalidEmail);
    }
    Ok(email)
}

async fn open_session(db: &Database, user_id: &str, config: &ServerConfig) -> ServiceResult<Session> {
    let token = crypto::generate_token();
    let now = now_millis();
    let expires = now + DAY_MILLIS * config.session_expiry_days as i64;
    sqlx::query("INSERT INTO sessions (session_token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(now)
        .bind(expires)
        .execute(&db.pool)
        .await?;
    Ok(Session { user_id: user_id.to_string(), token })
}

/// Creates the auth record and the user profile, then signs the new user in.
pub async fn sign_up(db: Arc<Database>, email: &str, password: &str, display_name: &str, config: &ServerConfig) -> ServiceResult<Session> {
    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::WeakPassword);
    }
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(ServiceError::InvalidInput("Please enter your name".to_string()));
    }
    info!("[AUTH] Sign-up attempt for {}", email);

    let exists = sqlx::query("SELECT 1 FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&db.pool)
        .await?
        .is_some();
    if exists {
        return Err(ServiceError::EmailInUse);
    }

    let user_id = uuid::Uuid::new_v4().to_string();
    let password_hash = crypto::hash_password(password)?;
    let mut tx = db.pool.begin().await?;
    sqlx::query("INSERT INTO users (id, email, display_name, photo_url, created_at) VALUES (?, ?, ?, NULL, ?)")
        .bind(&user_id)
        .bind(&email)
        .bind(display_name)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO auth (user_id, password_hash) VALUES (?, ?)")
        .bind(&user_id)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("[AUTH] Registered {} (id={})", email, user_id);
    open_session(&db, &user_id, config).await
}

pub async fn sign_in(db: Arc<Database>, email: &str, password: &str, config: &ServerConfig) -> ServiceResult<Session> {
    let email = normalize_email(email)?;
    let row = sqlx::query("SELECT users.id, auth.password_hash FROM users JOIN auth ON users.id = auth.user_id WHERE users.email = ?")
        .bind(&email)
        .fetch_optional(&db.pool)
        .await?;
    let Some(row) = row else {
        info!("[AUTH] Sign-in failed for {}: user not found", email);
        return Err(ServiceError::UserNotFound);
    };
    let user_id: String = row.get("id");
    let password_hash: String = row.get("password_hash");
    if !crypto::verify_password(&password_hash, password) {
        info!("[AUTH] Sign-in failed for {}: wrong password", email);
        return Err(ServiceError::WrongPassword);
    }
    let session = open_session(&db, &user_id, config).await?;
    info!("[AUTH] Signed in {} (id={})", email, user_id);
    Ok(session)
}

pub async fn sign_out(db: Arc<Database>, session_token: &str) -> ServiceResult<()> {
    let res = sqlx::query("DELETE FROM sessions WHERE session_token = ?")
        .bind(session_token)
        .execute(&db.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ServiceError::InvalidSession);
    }
    info!("[AUTH] Session closed");
    Ok(())
}

pub async fn validate_session(db: Arc<Database>, session_token: &str) -> ServiceResult<String> {
    let row = sqlx::query("SELECT user_id FROM sessions WHERE session_token = ? AND expires_at > ?")
        .bind(session_token)
        .bind(now_millis())
        .fetch_optional(&db.pool)
        .await?;
    row.map(|r| r.get::<String, _>("user_id")).ok_or(ServiceError::InvalidSession)
}

/// Issues a single-use reset token. Delivering it to the inbox is someone else's job.
pub async fn request_password_reset(db: Arc<Database>, email: &str, config: &ServerConfig) -> ServiceResult<String> {
    let email = normalize_email(email)?;
    let row = sqlx::query("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&db.pool)
        .await?;
    let user_id: String = row.map(|r| r.get("id")).ok_or(ServiceError::UserNotFound)?;

    let reset_token = crypto::generate_token();
    let expires = now_millis() + 60_000 * config.reset_token_ttl_minutes as i64;
    sqlx::query("INSERT INTO password_resets (reset_token, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(&reset_token)
        .bind(&user_id)
        .bind(expires)
        .execute(&db.pool)
        .await?;
    info!("[AUTH] Password reset token issued for user {}", user_id);
    Ok(reset_token)
}

pub async fn confirm_password_reset(db: Arc<Database>, reset_token: &str, new_password: &str) -> ServiceResult<()> {
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::WeakPassword);
    }
    let password_hash = crypto::hash_password(new_password)?;

    let mut tx = db.pool.begin().await?;
    let row = sqlx::query("SELECT user_id FROM password_resets WHERE reset_token = ? AND expires_at > ?")
        .bind(reset_token)
        .bind(now_millis())
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        return Err(ServiceError::InvalidInput("Reset link is invalid or has expired".to_string()));
    };
    let user_id: String = row.get("user_id");

    sqlx::query("UPDATE auth SET password_hash = ? WHERE user_id = ?")
        .bind(&password_hash)
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM password_resets WHERE user_id = ?")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("[AUTH] Password reset completed for user {}", user_id);
    Ok(())
}

/// Removes expired sessions and reset tokens. Idempotent, safe to run periodically.
pub async fn cleanup_expired_sessions(db: Arc<Database>) {
    let now = now_millis();
    match sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(&db.pool)
        .await
    {
        Ok(res) => info!("[AUTH] Cleaned up {} expired sessions", res.rows_affected()),
        Err(e) => warn!("[AUTH] Failed to clean up sessions: {}", e),
    }
    if let Err(e) = sqlx::query("DELETE FROM password_resets WHERE expires_at <= ?")
        .bind(now)
        .execute(&db.pool)
        .await
    {
        warn!("[AUTH] Failed to clean up reset tokens: {}", e);
    }
}
