// Invite-code cipher and password hashing shared between client and server
use argon2::{Argon2, password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString}};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use ring::aead::{self, AES_256_GCM, LessSafeKey, UnboundKey, Nonce, NONCE_LEN};
use std::num::NonZeroU32;

const INVITE_KEY_SALT: &[u8] = b"movier/invite-code/v1";
const INVITE_KEY_ITERATIONS: u32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid invite code")]
    InvalidCode,
    #[error("encryption failed")]
    Encryption,
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

/// Reversible encoding of a group id into a shareable invite code.
///
/// The key comes from a single static secret shared by every server instance, so any
/// holder of the secret can decode any code. Codes identify a group; they do not grant
/// access on their own.
#[derive(Clone)]
pub struct InviteCodec {
    key: [u8; 32],
}

impl InviteCodec {
    pub fn new(secret: &str) -> Self {
        Self { key: derive_key_from_secret(secret, INVITE_KEY_SALT) }
    }

    /// `base64url(nonce || ciphertext)`
    pub fn encrypt(&self, group_id: &str) -> Result<String, CryptoError> {
        let key = LessSafeKey::new(UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| CryptoError::Encryption)?);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut sealed = group_id.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut sealed)
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    pub fn decrypt(&self, code: &str) -> Result<String, CryptoError> {
        let data = URL_SAFE_NO_PAD.decode(code.trim()).map_err(|_| CryptoError::InvalidCode)?;
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::InvalidCode);
        }
        let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
        let nonce_array: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| CryptoError::InvalidCode)?;
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let key = LessSafeKey::new(UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| CryptoError::InvalidCode)?);
        let mut buf = sealed.to_vec();
        let plain = key.open_in_place(nonce, aead::Aad::empty(), &mut buf)
            .map_err(|_| CryptoError::InvalidCode)?;
        let group_id = String::from_utf8(plain.to_vec()).map_err(|_| CryptoError::InvalidCode)?;
        if group_id.is_empty() {
            return Err(CryptoError::InvalidCode);
        }
        Ok(group_id)
    }
}

/// Generates a 256-bit key from a secret using PBKDF2
pub fn derive_key_from_secret(secret: &str, salt: &[u8]) -> [u8; 32] {
    use ring::pbkdf2;
    let iterations = NonZeroU32::new(INVITE_KEY_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    let mut key = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, secret.as_bytes(), &mut key);
    key
}

pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Opaque random token for sessions and password resets.
pub fn generate_token() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);
    format!("{}-{:x}", uuid, md5::compute(random))
}
