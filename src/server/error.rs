use crate::common::crypto::CryptoError;

/// Every failure a service operation can surface to the user.
///
/// The protocol layer renders these as a single `ERR:` line; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Invalid invite code!")]
    InvalidInviteCode,
    #[error("Invalid or expired session")]
    InvalidSession,
    #[error("The email address you entered is invalid.")]
    InvalidEmail,
    #[error("The email address is already in use.")]
    EmailInUse,
    #[error("The password must be at least 6 characters.")]
    WeakPassword,
    #[error("No user found for this email address.")]
    UserNotFound,
    #[error("The password you entered is incorrect.")]
    WrongPassword,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn not_member() -> Self {
        ServiceError::Forbidden("You are not a member of this group".to_string())
    }

    pub fn not_owner() -> Self {
        ServiceError::Forbidden("Only the group owner can do this".to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
