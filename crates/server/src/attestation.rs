//! Gateway-backed attestation client.
//!
//! Events are posted as JSON to `{gateway_url}/attestations` with a bearer
//! token; the gateway answers with the transaction id it assigned.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::attestation::{AttestationClient, AttestationError, AttestationMode};
use stockflow_core::config::AttestationConfig;
use stockflow_core::domain::attestation::{AttestationEvent, TransactionId};

pub const MAX_COMMENT_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum AttestationSetupError {
    #[error("attestation.gateway_url is required in gateway mode")]
    MissingGatewayUrl,
    #[error("attestation.api_key is required in gateway mode")]
    MissingApiKey,
    #[error("failed to build attestation http client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    subject: String,
    contract_address: Option<&'a str>,
    event: AttestationEvent,
}

#[derive(Deserialize)]
struct SubmitReply {
    transaction_id: String,
}

pub struct HttpAttestationClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    contract_address: Option<String>,
    timeout: Duration,
}

impl HttpAttestationClient {
    pub fn from_config(config: &AttestationConfig) -> Result<Self, AttestationSetupError> {
        let gateway_url =
            config.gateway_url.as_deref().ok_or(AttestationSetupError::MissingGatewayUrl)?;
        let api_key = config.api_key.clone().ok_or(AttestationSetupError::MissingApiKey)?;
        let timeout = Duration::from_secs(config.timeout_secs);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AttestationSetupError::Client)?;

        Ok(Self {
            http,
            endpoint: format!("{}/attestations", gateway_url.trim_end_matches('/')),
            api_key,
            contract_address: config.contract_address.clone(),
            timeout,
        })
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Shortens free text to what the on-chain record accepts.
pub fn trim_comment(comment: &str) -> String {
    comment.chars().take(MAX_COMMENT_CHARS).collect()
}

fn outbound_event(event: &AttestationEvent) -> AttestationEvent {
    match event {
        AttestationEvent::Approval { request_id, stage, decision, comment } => {
            AttestationEvent::Approval {
                request_id: request_id.clone(),
                stage: *stage,
                decision: *decision,
                comment: trim_comment(comment),
            }
        }
        other => other.clone(),
    }
}

#[async_trait]
impl AttestationClient for HttpAttestationClient {
    fn mode(&self) -> AttestationMode {
        AttestationMode::Gateway
    }

    async fn submit(&self, event: &AttestationEvent) -> Result<TransactionId, AttestationError> {
        let body = SubmitBody {
            subject: event.subject_key(),
            contract_address: self.contract_address.as_deref(),
            event: outbound_event(event),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    AttestationError::Timeout { timeout_ms: self.timeout_ms() }
                } else {
                    AttestationError::Unavailable(error.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttestationError::Unavailable(format!("gateway answered {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AttestationError::Rejected(format!("gateway answered {status}: {detail}")));
        }

        let reply: SubmitReply = response
            .json()
            .await
            .map_err(|error| AttestationError::Rejected(format!("unreadable reply: {error}")))?;
        if reply.transaction_id.trim().is_empty() {
            return Err(AttestationError::Rejected("gateway returned an empty transaction id".into()));
        }
        Ok(TransactionId(reply.transaction_id))
    }
}
