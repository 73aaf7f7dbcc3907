//! Access token refresh against Intuit's OAuth 2.0 token endpoint.
//!
//! Access tokens last about an hour. Each refresh returns a new refresh
//! token as well; callers must store it, since the old one stops working.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::{DEFAULT_TIMEOUT, QboError};

/// Token endpoint shared by production and sandbox companies.
pub const TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

/// Access tokens this close to expiry are refreshed early.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// A token pair with absolute expiry times.
#[derive(Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

impl Tokens {
    /// Whether the access token is still good at `now`, with a margin.
    pub fn access_token_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::minutes(EXPIRY_MARGIN_MINUTES) < self.expires_at
    }

    pub fn refresh_token_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }
}

/// OAuth client for one QuickBooks app.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, QboError> {
        Self::with_token_url(client_id, client_secret, TOKEN_URL)
    }

    /// Creates a client against an explicit token endpoint.
    pub fn with_token_url(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Result<Self, QboError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();

        if client_id.trim().is_empty() {
            return Err(QboError::InvalidCredentials {
                reason: "client ID cannot be empty",
            });
        }
        if client_secret.trim().is_empty() {
            return Err(QboError::InvalidCredentials {
                reason: "client secret cannot be empty",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(QboError::ClientBuild)?;

        Ok(Self {
            http,
            client_id: client_id.trim().to_string(),
            client_secret,
            token_url: token_url.into(),
        })
    }

    /// Exchanges a refresh token for a new token pair.
    ///
    /// Expiry times are computed from `now`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Tokens, QboError> {
        #[derive(Deserialize)]
        struct Response {
            access_token: String,
            refresh_token: String,
            expires_in: i64,
            x_refresh_token_expires_in: i64,
        }

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(parse_oauth_error(&body).unwrap_or_else(|| QboError::Api {
                message: format!("token refresh failed with status {status}: {body}"),
            }));
        }

        let parsed: Response = serde_json::from_str(&body)
            .map_err(|err| QboError::InvalidResponse(err.to_string()))?;
        tracing::debug!(expires_in = parsed.expires_in, "refreshed access token");
        Ok(Tokens {
            expires_at: expiry(now, parsed.expires_in)?,
            refresh_expires_at: expiry(now, parsed.x_refresh_token_expires_in)?,
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
        })
    }
}

fn expiry(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>, QboError> {
    TimeDelta::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| QboError::InvalidResponse(format!("invalid token lifetime: {seconds}s")))
}

fn parse_oauth_error(body: &str) -> Option<QboError> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        error: String,
        error_description: Option<String>,
    }

    let payload = serde_json::from_str::<ErrorPayload>(body).ok()?;
    let message = payload
        .error_description
        .unwrap_or_else(|| payload.error.clone());
    Some(if payload.error == "invalid_grant" {
        QboError::InvalidGrant { message }
    } else {
        QboError::Api { message }
    })
}
