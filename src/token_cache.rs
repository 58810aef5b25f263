//! On-disk cache of the Spotify OAuth token.
//!
//! The token lives at `<config-dir>/spotify` as JSON, readable by the owner only.

use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenCacheError};

/// File name of the cached token inside the config directory.
const TOKEN_FILE: &str = "spotify";

/// A persisted Spotify OAuth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CachedToken {
    /// Whether the token can still be used at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

/// Path of the token file inside `dir`.
pub fn token_path(dir: &Path) -> PathBuf {
    dir.join(TOKEN_FILE)
}

/// Read the cached token, rejecting it if it has already expired.
pub fn load(dir: &Path) -> std::result::Result<CachedToken, TokenCacheError> {
    load_at(dir, Utc::now())
}

fn load_at(dir: &Path, now: DateTime<Utc>) -> std::result::Result<CachedToken, TokenCacheError> {
    let blob = fs::read(token_path(dir)).map_err(TokenCacheError::NotFound)?;
    let token: CachedToken = serde_json::from_slice(&blob).map_err(TokenCacheError::Malformed)?;
    if !token.is_valid_at(now) {
        return Err(TokenCacheError::Expired {
            expiry: token.expiry,
        });
    }
    Ok(token)
}

/// Overwrite the cached token.
pub fn save(dir: &Path, token: &CachedToken) -> Result<()> {
    let blob = serde_json::to_vec(token)?;
    let path = token_path(dir);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(&path)?;
    file.write_all(&blob)?;

    // `mode` only applies on creation; tighten files left by older runs too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
