use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use super::config::Config;

/// Bearer token obtained from the pairing exchange
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    token: Credential,
    paired_at: DateTime<Utc>,
    api_url: String,
}

/// Persists the credential between runs
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        CredentialStore { path }
    }

    pub fn in_data_dir() -> Self {
        Self::new(super::config::data_dir().join("credentials.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored token, if it was paired against `api_url`
    pub fn load(&self, api_url: &str) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let stored: StoredCredential = toml::from_str(&content)
            .with_context(|| format!("Corrupt credential file {}", self.path.display()))?;
        if stored.api_url != api_url {
            tracing::warn!(
                "Stored credential was paired with {}, not {}; ignoring it",
                stored.api_url,
                api_url
            );
            return Ok(None);
        }
        Ok(Some(stored.token))
    }

    pub fn save(&self, api_url: &str, token: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredCredential {
            token: token.clone(),
            paired_at: Utc::now(),
            api_url: api_url.to_string(),
        };
        std::fs::write(&self.path, toml::to_string_pretty(&stored)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Authenticated session against one bridge. Created by pairing (or by
/// restoring a stored credential) and ended by logout; every component
/// that talks to the bridge receives it explicitly.
#[derive(Debug, Clone)]
pub struct SessionContext {
    api_url: Url,
    realtime_url: Url,
    credential: Credential,
}

impl SessionContext {
    pub fn new(config: &Config, credential: Credential) -> Result<Self> {
        let api_url = Url::parse(&config.server.api_url)
            .with_context(|| format!("Invalid API URL {}", config.server.api_url))?;
        let realtime_url = Url::parse(&config.server.realtime_url)
            .with_context(|| format!("Invalid realtime URL {}", config.server.realtime_url))?;
        Ok(SessionContext {
            api_url,
            realtime_url,
            credential,
        })
    }

    /// Restore the session from the credential store
    pub fn restore(config: &Config, store: &CredentialStore) -> Result<Self> {
        let credential = store.load(&config.server.api_url)?.ok_or_else(|| {
            anyhow!("Not paired with {}. Run 'bridgeview pair <KEY>' first.", config.server.api_url)
        })?;
        Self::new(config, credential)
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Push endpoint with the credential attached as `token` query parameter
    pub fn realtime_endpoint(&self) -> Url {
        let mut url = self.realtime_url.clone();
        url.query_pairs_mut()
            .append_pair("token", self.credential.expose());
        url
    }

    /// End the session and forget the stored credential
    pub fn logout(self, store: &CredentialStore) -> Result<()> {
        store.clear()?;
        tracing::info!("Logged out of {}", self.api_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.toml"));
        let api_url = "http://127.0.0.1:8001";

        assert!(store.load(api_url).unwrap().is_none());

        store.save(api_url, &Credential::new("tok-123")).unwrap();
        assert_eq!(store.load(api_url).unwrap(), Some(Credential::new("tok-123")));
        assert!(store.load("http://elsewhere:8001").unwrap().is_none());

        assert!(store.clear().unwrap());
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn test_realtime_endpoint_carries_token() {
        let context = SessionContext::new(&Config::default(), Credential::new("a b")).unwrap();
        assert_eq!(
            context.realtime_endpoint().as_str(),
            "ws://127.0.0.1:8000/ws/realtime?token=a+b"
        );
    }

    #[test]
    fn test_restore_without_pairing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.toml"));
        assert!(SessionContext::restore(&Config::default(), &store).is_err());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        assert_eq!(format!("{:?}", Credential::new("secret")), "Credential(***)");
    }
}
