//! Configuration loading for Prune
//!
//! OAuth credentials come from (in order of priority):
//! 1. Compile-time embedded credentials
//! 2. `google-credentials.json` in the config directory (Google Cloud Console format)
//! 3. Runtime environment variables
//!
//! Sync tuning lives in `settings.json`; every field is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::sync::SyncOptions;

/// Credentials filename in the Prune config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Sync settings filename in the Prune config directory
const SETTINGS_FILE: &str = "settings.json";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let file: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(file);
        }

        Self::from_env().with_context(|| {
            format!(
                "No Gmail OAuth credentials: place {} in the config directory or set GMAIL_CLIENT_ID/GMAIL_CLIENT_SECRET",
                CREDENTIALS_FILE
            )
        })
    }

    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(file)
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let file: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(file)
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    fn from_credential_file(file: GoogleCredentialFile) -> Result<Self> {
        let section = file
            .installed
            .or(file.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
        })
    }
}

/// User-tunable sync settings (`settings.json`)
///
/// Delays are in milliseconds. Missing fields take the defaults of
/// [`SyncOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub page_size: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub quota_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncOptions::default())
    }
}

impl From<&SyncOptions> for SyncSettings {
    fn from(options: &SyncOptions) -> Self {
        Self {
            page_size: options.page_size,
            batch_size: options.batch_size,
            workers: options.workers,
            max_attempts: options.max_attempts,
            retry_delay_ms: options.retry_delay.as_millis() as u64,
            rate_limit_delay_ms: options.rate_limit_delay.as_millis() as u64,
            quota_delay_ms: options.quota_delay.as_millis() as u64,
        }
    }
}

impl SyncSettings {
    /// Load `settings.json`, or defaults when the file does not exist
    pub fn load() -> Result<Self> {
        if config::config_exists(SETTINGS_FILE) {
            config::load_json(SETTINGS_FILE)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Convert to engine options, clamping values to what Gmail accepts
    pub fn to_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.page_size.clamp(1, SyncOptions::MAX_PAGE_SIZE),
            batch_size: self.batch_size.clamp(1, SyncOptions::MAX_BATCH_SIZE),
            workers: self.workers.max(1),
            max_attempts: self.max_attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            rate_limit_delay: Duration::from_millis(self.rate_limit_delay_ms),
            quota_delay: Duration::from_millis(self.quota_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "prune-client.apps.googleusercontent.com",
                "client_secret": "s3cret",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "prune-client.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "s3cret");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{"web": {"client_id": "web-id", "client_secret": "web-secret"}}"#;
        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-id");
    }

    #[test]
    fn test_credentials_without_section() {
        assert!(GmailCredentials::from_json(r#"{ "other": {} }"#).is_err());
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"batch_size": 10, "quota_delay_ms": 5000}"#).unwrap();
        let options = settings.to_options();

        assert_eq!(options.batch_size, 10);
        assert_eq!(options.quota_delay, Duration::from_secs(5));
        assert_eq!(options.page_size, 500);
        assert_eq!(options.max_attempts, SyncOptions::default().max_attempts);
    }

    #[test]
    fn test_settings_are_clamped() {
        let settings = SyncSettings {
            page_size: 10_000,
            batch_size: 0,
            workers: 0,
            ..SyncSettings::default()
        };
        let options = settings.to_options();

        assert_eq!(options.page_size, 500);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.workers, 1);
    }

    #[test]
    fn test_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"workers": 2}"#).unwrap();

        let settings = SyncSettings::from_file(&path).unwrap();
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.batch_size, 25);
    }
}
