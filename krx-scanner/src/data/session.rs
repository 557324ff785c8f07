//! Shared KIS session: access token issuance and caching.
//!
//! One `KisSession` is handed to every component that calls the API. Readers
//! share the cached bearer token; when it is missing or expired exactly one
//! caller issues a new one while the others wait on the refresh lock and then
//! reuse the fresh token.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::provider::ProviderError;

/// Token endpoint path.
const TOKEN_PATH: &str = "/oauth2/tokenP";

/// Expiry format used by the token cache file.
const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// A bearer token and its local expiry time.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: NaiveDateTime,
}

impl AccessToken {
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    expiry: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Authenticated session capability shared by all KIS requests.
pub struct KisSession {
    client: reqwest::Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    token: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
    cache_path: Option<PathBuf>,
}

impl KisSession {
    /// Create a session. A still-valid token in `cache_path` is reused.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        cache_path: Option<PathBuf>,
    ) -> Self {
        let cached = cache_path.as_ref().and_then(|p| load_cached_token(p));
        if let Some(token) = &cached {
            info!(expires_at = %token.expires_at, "Loaded cached KIS token");
        }

        Self {
            client,
            base_url: base_url.into(),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            token: RwLock::new(cached),
            refresh_lock: Mutex::new(()),
            cache_path,
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }

    async fn current(&self) -> Option<String> {
        let now = Local::now().naive_local();
        self.token
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_valid_at(now))
            .map(|t| t.value.clone())
    }

    /// Return a valid bearer token, issuing a new one if needed.
    pub async fn bearer(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let token = self.issue_token().await?;
        let value = token.value.clone();
        if let Some(path) = &self.cache_path {
            save_cached_token(path, &token);
        }
        *self.token.write().await = Some(token);
        Ok(value)
    }

    /// Drop the cached token if it is still `rejected`, so the next call
    /// re-authenticates. A token already replaced by another task is kept.
    pub async fn invalidate(&self, rejected: &str) {
        let mut token = self.token.write().await;
        if token.as_ref().is_some_and(|t| t.value == rejected) {
            *token = None;
        }
    }

    async fn issue_token(&self) -> Result<AccessToken, ProviderError> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: &self.app_key,
            appsecret: &self.app_secret,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "KIS token request rejected");
            return Err(ProviderError::Auth(format!("{} - {}", status, text)));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("token response: {}", e)))?;

        let expires_at = Local::now().naive_local() + ChronoDuration::seconds(parsed.expires_in);
        info!(expires_at = %expires_at, "Issued KIS access token");

        Ok(AccessToken {
            value: parsed.access_token,
            expires_at,
        })
    }
}

fn load_cached_token(path: &Path) -> Option<AccessToken> {
    let content = std::fs::read_to_string(path).ok()?;
    let cached: CachedToken = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable token cache");
            return None;
        }
    };
    let expires_at = NaiveDateTime::parse_from_str(&cached.expiry, EXPIRY_FORMAT).ok()?;
    let token = AccessToken {
        value: cached.access_token,
        expires_at,
    };

    if token.is_valid_at(Local::now().naive_local()) {
        Some(token)
    } else {
        debug!(path = %path.display(), "Cached token expired");
        None
    }
}

fn save_cached_token(path: &Path, token: &AccessToken) {
    let cached = CachedToken {
        access_token: token.value.clone(),
        expiry: token.expires_at.format(EXPIRY_FORMAT).to_string(),
    };
    let result = serde_json::to_string(&cached)
        .map_err(std::io::Error::other)
        .and_then(|body| std::fs::write(path, body));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to save token cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validity_margin() {
        let now = Local::now().naive_local();
        let token = AccessToken {
            value: "t".into(),
            expires_at: now + ChronoDuration::seconds(30),
        };
        assert!(!token.is_valid_at(now));

        let token = AccessToken {
            value: "t".into(),
            expires_at: now + ChronoDuration::hours(1),
        };
        assert!(token.is_valid_at(now));
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kis_token.json");
        let token = AccessToken {
            value: "cached-token".into(),
            expires_at: Local::now().naive_local() + ChronoDuration::hours(6),
        };

        save_cached_token(&path, &token);
        let loaded = load_cached_token(&path).unwrap();
        assert_eq!(loaded.value, "cached-token");
    }

    #[test]
    fn test_expired_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kis_token.json");
        std::fs::write(
            &path,
            r#"{"access_token": "old", "expiry": "2001-01-01 00:00:00"}"#,
        )
        .unwrap();
        assert!(load_cached_token(&path).is_none());
    }

    #[tokio::test]
    async fn test_session_uses_cached_token_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kis_token.json");
        save_cached_token(
            &path,
            &AccessToken {
                value: "from-cache".into(),
                expires_at: Local::now().naive_local() + ChronoDuration::hours(1),
            },
        );

        // Unroutable base URL: any network call would fail
        let session = KisSession::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "key",
            "secret",
            Some(path),
        );
        assert_eq!(session.bearer().await.unwrap(), "from-cache");
    }

    #[tokio::test]
    async fn test_invalidate_keeps_replaced_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kis_token.json");
        save_cached_token(
            &path,
            &AccessToken {
                value: "fresh".into(),
                expires_at: Local::now().naive_local() + ChronoDuration::hours(1),
            },
        );
        let session = KisSession::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "key",
            "secret",
            Some(path),
        );

        session.invalidate("stale").await;
        assert_eq!(session.current().await.as_deref(), Some("fresh"));

        session.invalidate("fresh").await;
        assert!(session.current().await.is_none());
    }
}
