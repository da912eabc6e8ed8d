//! Gmail OAuth2 authentication
//!
//! Installed-app authorization code flow with a loopback redirect, a token
//! file in the config directory and refresh-token renewal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use url::Url;

use crate::config::GmailCredentials;

/// Source of bearer tokens for Gmail API requests
///
/// The sync engine never sees how a token was obtained or refreshed.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Fixed token, for scripts that manage OAuth themselves
impl AccessTokenProvider for String {
    fn access_token(&self) -> Result<String> {
        Ok(self.clone())
    }
}

/// Token file contents
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    /// Seconds of validity we require before reusing a token
    const EXPIRY_MARGIN_SECS: i64 = 300;

    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at > chrono::Utc::now().timestamp() + Self::EXPIRY_MARGIN_SECS)
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// OAuth2 token management for Gmail
pub struct GmailAuth {
    credentials: GmailCredentials,
    token_path: PathBuf,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Full mailbox scope; trashing messages needs more than read access
    const SCOPE: &'static str = "https://mail.google.com/";

    const TOKEN_FILE: &'static str = "gmail-token.json";

    /// Create an authenticator storing tokens in the Prune config directory
    pub fn new(credentials: GmailCredentials) -> Result<Self> {
        let token_path =
            config::config_path(Self::TOKEN_FILE).context("Could not determine config directory")?;
        Ok(Self::with_token_path(credentials, token_path))
    }

    /// Create an authenticator with an explicit token file location
    pub fn with_token_path(credentials: GmailCredentials, token_path: PathBuf) -> Self {
        Self {
            credentials,
            token_path,
        }
    }

    /// Whether a usable (fresh or refreshable) token is stored
    pub fn has_stored_token(&self) -> bool {
        self.load_token()
            .is_ok_and(|t| t.is_fresh() || t.refresh_token.is_some())
    }

    /// Remove the stored token (logout)
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path).with_context(|| {
                format!("Failed to remove token file {}", self.token_path.display())
            })?;
        }
        Ok(())
    }

    fn authorize_in_browser(&self) -> Result<TokenResponse> {
        let listener =
            TcpListener::bind("127.0.0.1:0").context("Failed to bind loopback listener")?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}");

        let mut auth_url = Url::parse(Self::AUTH_URL)?;
        auth_url
            .query_pairs_mut()
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", Self::SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        log::info!("Opening browser for Gmail authorization");
        eprintln!("If the browser does not open, visit:\n{auth_url}");
        if let Err(e) = open::that(auth_url.as_str()) {
            log::warn!("Failed to open browser: {}", e);
        }

        let code = Self::receive_code(&listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")
    }

    /// Accept the redirect and pull `code` out of its query string
    fn receive_code(listener: &TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept OAuth redirect")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read OAuth redirect")?;

        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let redirect = Url::parse(&format!("http://127.0.0.1{target}"))?;
        let param = |name: &str| {
            redirect
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let code = param("code");

        let message = if code.is_some() {
            "Authorization complete. You can close this window."
        } else {
            "Authorization failed. Please try again."
        };
        let _ = write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{message}"
        );

        if let Some(error) = param("error") {
            anyhow::bail!("OAuth error: {}", error);
        }
        code.context("No authorization code in OAuth redirect")
    }

    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh response")?;

        // Google omits the refresh token on renewal
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        config::load_json_file(&self.token_path)
    }

    fn save_token(&self, token: &TokenResponse) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            config::ensure_dir(parent)?;
        }
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        };
        config::save_json_file(&self.token_path, &stored)
    }
}

impl AccessTokenProvider for GmailAuth {
    fn access_token(&self) -> Result<String> {
        if let Ok(stored) = self.load_token() {
            if stored.is_fresh() {
                return Ok(stored.access_token);
            }
            if let Some(refresh_token) = stored.refresh_token.as_deref() {
                match self.refresh(refresh_token) {
                    Ok(token) => {
                        self.save_token(&token)?;
                        return Ok(token.access_token);
                    }
                    Err(e) => log::warn!("Token refresh failed, re-authorizing: {:#}", e),
                }
            }
        }

        let token = self.authorize_in_browser()?;
        self.save_token(&token)?;
        Ok(token.access_token)
    }
}
