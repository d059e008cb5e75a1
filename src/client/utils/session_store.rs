use keyring::Entry;
use std::path::PathBuf;
use log::{info, warn};

const SERVICE: &str = "movier";
const USER: &str = "movier_session";

fn fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").map(|v| v == "true" || v == "1").unwrap_or(false)
}

fn fallback_path() -> PathBuf {
    std::path::Path::new("data").join("movier_session.txt")
}

/// Stores the session token in the OS keyring. Falls back to a local file only when
/// `KEYRING_FALLBACK` is set.
pub fn save_session_token(token: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, USER);
    match entry.set_password(token) {
        Ok(()) => Ok(()),
        Err(e) if fallback_enabled() => {
            let path = fallback_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, token)?;
            // never log the token itself
            warn!("[SESSION_STORE] Keyring unavailable ({}), persisted token to {:?}", e, path);
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("keyring unavailable and file fallback disabled: {}", e)),
    }
}

pub fn load_session_token() -> Option<String> {
    let entry = Entry::new(SERVICE, USER);
    match entry.get_password() {
        Ok(t) if !t.trim().is_empty() => Some(t),
        Ok(_) => None,
        Err(_) if fallback_enabled() => std::fs::read_to_string(fallback_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|t| !t.is_empty()),
        Err(_) => None,
    }
}

pub fn clear_session_token() {
    let entry = Entry::new(SERVICE, USER);
    let _ = entry.delete_password();
    if fallback_enabled() {
        let path = fallback_path();
        if path.exists() && std::fs::remove_file(&path).is_ok() {
            info!("[SESSION_STORE] Removed fallback session file");
        }
    }
}
