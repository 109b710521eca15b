//! Short-lived connection credentials.
//!
//! The credential endpoint hands out a single-use secret (≈60 s TTL)
//! that authorizes exactly one negotiation attempt. The provider does
//! not retry and does not refresh; expiry means the caller requests a
//! fresh session.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use comanda_types::SessionMode;

/// Errors from the credential endpoint.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The request could not be sent or the connection failed.
    #[error("credential request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("credential endpoint returned status {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("malformed credential payload: {0}")]
    Malformed(String),
}

/// A single-use negotiation credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionCredential {
    /// Bearer secret for the offer/answer exchange.
    pub secret: String,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at: u64,
}

impl SessionCredential {
    /// Whether the credential has already expired.
    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp_millis();
        now >= 0 && self.expires_at <= now as u64
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Fetches negotiation credentials for a restaurant/mode pair.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Requests a fresh credential. No retries at this layer.
    async fn fetch(
        &self,
        restaurant_id: &str,
        mode: SessionMode,
    ) -> Result<SessionCredential, CredentialError>;
}

#[derive(Serialize)]
struct CredentialRequest<'a> {
    restaurant_id: &'a str,
    mode: SessionMode,
}

#[derive(Deserialize)]
struct CredentialResponse {
    secret: String,
    expires_at: u64,
}

/// Production provider: POSTs to the external token endpoint.
pub struct HttpCredentialProvider {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpCredentialProvider {
    /// Creates a provider for the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(
        &self,
        restaurant_id: &str,
        mode: SessionMode,
    ) -> Result<SessionCredential, CredentialError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&CredentialRequest {
                restaurant_id,
                mode,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Status(status.as_u16()));
        }

        let body: CredentialResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        if body.secret.is_empty() {
            return Err(CredentialError::Malformed("empty secret".to_string()));
        }

        Ok(SessionCredential {
            secret: body.secret,
            expires_at: body.expires_at,
        })
    }
}

/// Provider that hands out a preconfigured credential. Useful for
/// local development against a stub backend and for tests.
pub struct StaticCredentialProvider {
    credential: SessionCredential,
}

impl StaticCredentialProvider {
    /// Wraps a fixed credential.
    pub fn new(credential: SessionCredential) -> Self {
        Self { credential }
    }

    /// A credential that stays valid for `ttl_ms` from now.
    pub fn valid_for(secret: impl Into<String>, ttl_ms: u64) -> Self {
        let expires_at = Utc::now().timestamp_millis().max(0) as u64 + ttl_ms;
        Self::new(SessionCredential {
            secret: secret.into(),
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch(
        &self,
        _restaurant_id: &str,
        _mode: SessionMode,
    ) -> Result<SessionCredential, CredentialError> {
        Ok(self.credential.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_secret() {
        let credential = SessionCredential {
            secret: "super-secret".into(),
            expires_at: 12345,
        };
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn expiry_compares_against_now() {
        let stale = SessionCredential {
            secret: "s".into(),
            expires_at: 1,
        };
        assert!(stale.is_expired());

        let fresh = SessionCredential {
            secret: "s".into(),
            expires_at: Utc::now().timestamp_millis() as u64 + 60_000,
        };
        assert!(!fresh.is_expired());
    }

    #[tokio::test]
    async fn static_provider_returns_its_credential() {
        let provider = StaticCredentialProvider::valid_for("abc", 60_000);
        let credential = provider
            .fetch("r-1", SessionMode::Employee)
            .await
            .expect("static fetch cannot fail");
        assert_eq!(credential.secret, "abc");
        assert!(!credential.is_expired());
    }
}
