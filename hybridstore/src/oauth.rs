//! Google OAuth authorization-code flow and token lifecycle.
//!
//! Tokens are stored encrypted ([`SealedTokens`]) and only decrypted for
//! the duration of a request.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OAuthConfig;
use crate::crypto::{CryptoError, TokenCipher};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Refresh tokens that expire within this window.
const REFRESH_SKEW_SECS: i64 = 300;

/// Short-lived bearer credential for the Drive API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OAuth token endpoint error: HTTP {status} - {body}")]
    Api { status: u16, body: String },
    #[error("Invalid authorization URL: {0}")]
    InvalidUrl(String),
    #[error("Access token expired and no refresh token is stored")]
    Expired,
    #[error("Token endpoint returned an unusable expires_in: {0}")]
    InvalidExpiry(i64),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Decrypted tokens, held only for the duration of a call.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: AccessToken,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

impl TokenSet {
    fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Result<Self, OAuthError> {
        let expires_at = Some(resp.expires_in)
            .filter(|secs| *secs >= 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(OAuthError::InvalidExpiry(resp.expires_in))?;
        Ok(Self {
            access_token: AccessToken::new(resp.access_token),
            refresh_token: resp.refresh_token,
            expires_at,
            scope: resp.scope,
        })
    }

    /// True if the access token expires within `skew` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at <= now + skew
    }

    pub fn seal(&self, cipher: &TokenCipher) -> Result<SealedTokens, CryptoError> {
        Ok(SealedTokens {
            access_token: cipher.encrypt(self.access_token.secret())?,
            refresh_token: self
                .refresh_token
                .as_deref()
                .map(|t| cipher.encrypt(t))
                .transpose()?,
            expires_at: self.expires_at,
            scope: self.scope.clone(),
        })
    }
}

/// At-rest form of a user's tokens, as persisted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl SealedTokens {
    pub fn open(&self, cipher: &TokenCipher) -> Result<TokenSet, CryptoError> {
        Ok(TokenSet {
            access_token: AccessToken::new(cipher.decrypt(&self.access_token)?),
            refresh_token: self
                .refresh_token
                .as_deref()
                .map(|t| cipher.decrypt(t))
                .transpose()?,
            expires_at: self.expires_at,
            scope: self.scope.clone(),
        })
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    client: Client,
    config: OAuthConfig,
    auth_url: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(client: Client, config: OAuthConfig) -> Self {
        Self::with_endpoints(client, config, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL)
    }

    pub fn with_endpoints(client: Client, config: OAuthConfig, auth_url: &str, token_url: &str) -> Self {
        Self {
            client,
            config,
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
        }
    }

    /// Consent-screen URL. `state` is echoed back to the redirect URI.
    pub fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", DRIVE_FILE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| OAuthError::InvalidUrl(e.to_string()))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError> {
        let tokens = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;
        info!(expires_at = %tokens.expires_at, "Exchanged authorization code for tokens");
        Ok(tokens)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let mut tokens = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;
        // Google only returns a new refresh token when it rotates one
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        debug!(expires_at = %tokens.expires_at, "Refreshed access token");
        Ok(tokens)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, OAuthError> {
        let resp = self.client.post(&self.token_url).form(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::Api { status, body });
        }

        let body: TokenResponse = resp.json().await?;
        TokenSet::from_response(body, Utc::now())
    }
}

/// Decrypt a user's stored tokens and return a usable access token.
///
/// When the token is about to expire it is refreshed; the second element
/// is then the re-sealed record the caller must persist.
pub async fn fresh_access_token(
    sealed: &SealedTokens,
    oauth: &OAuthClient,
    cipher: &TokenCipher,
) -> Result<(AccessToken, Option<SealedTokens>), OAuthError> {
    let tokens = sealed.open(cipher)?;
    let now = Utc::now();

    if !tokens.expires_within(now, Duration::seconds(REFRESH_SKEW_SECS)) {
        return Ok((tokens.access_token, None));
    }

    match tokens.refresh_token.as_deref() {
        Some(refresh_token) => {
            let refreshed = oauth.refresh(refresh_token).await?;
            let resealed = refreshed.seal(cipher)?;
            Ok((refreshed.access_token, Some(resealed)))
        }
        None if tokens.expires_at > now => Ok((tokens.access_token, None)),
        None => Err(OAuthError::Expired),
    }
}
