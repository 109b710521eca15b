//! Offer/answer exchange with the remote speech endpoint.

use async_trait::async_trait;

use crate::credential::SessionCredential;
use crate::error::TransportError;

/// Exchanges a local connection offer for the remote answer,
/// authenticated by the session credential.
#[async_trait]
pub trait AnswerExchange: Send + Sync {
    /// Sends `offer` and returns the answer body.
    async fn exchange(
        &self,
        offer: &str,
        credential: &SessionCredential,
    ) -> Result<String, TransportError>;
}

/// Production exchange: POSTs the offer SDP with the credential as
/// bearer auth; the response body is the answer SDP.
pub struct HttpSignaling {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpSignaling {
    /// Creates an exchange against the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AnswerExchange for HttpSignaling {
    async fn exchange(
        &self,
        offer: &str,
        credential: &SessionCredential,
    ) -> Result<String, TransportError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&credential.secret)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer.to_string())
            .send()
            .await
            .map_err(|e| TransportError::Signaling(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Signaling(format!(
                "endpoint returned status {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::Signaling(e.to_string()))
    }
}

/// Exchange that returns a canned answer. Pairs with the loopback
/// link for tests and local development.
pub struct StaticSignaling {
    answer: String,
}

impl StaticSignaling {
    /// Always answers with the given body.
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

impl Default for StaticSignaling {
    fn default() -> Self {
        Self::new("v=0\r\ns=loopback-answer\r\n")
    }
}

#[async_trait]
impl AnswerExchange for StaticSignaling {
    async fn exchange(
        &self,
        _offer: &str,
        _credential: &SessionCredential,
    ) -> Result<String, TransportError> {
        Ok(self.answer.clone())
    }
}
