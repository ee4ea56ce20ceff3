//! Ephemeral credential minting.
//!
//! Each session authenticates with a short-lived credential minted from the
//! session configuration, never with the long-lived key itself.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::base::{
    ApiKey, EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult, SignalingStage,
};
use super::openai::SessionConfig;

/// A short-lived credential for one session.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralCredential {
    value: String,
    expires_at: Option<u64>,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    #[inline]
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Expiry as Unix seconds, when the issuer reported one.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues ephemeral credentials for a session configuration.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Mint a credential.
    ///
    /// Failures are reported as [`RealtimeError::Signaling`] at
    /// [`SignalingStage::Credential`].
    async fn mint(&self, config: &RealtimeConfig) -> RealtimeResult<EphemeralCredential>;
}

#[derive(Serialize)]
struct MintRequest {
    session: SessionConfig,
}

#[derive(Deserialize)]
struct MintResponse {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    expires_at: Option<u64>,
}

/// Mints credentials by POSTing the session configuration to an HTTP endpoint.
///
/// The endpoint is either the provider's client-secret API (authenticated with
/// the configured key) or a local proxy that holds the key itself.
pub struct HttpCredentialIssuer {
    client: reqwest::Client,
    mint_url: String,
    api_key: Option<ApiKey>,
}

impl HttpCredentialIssuer {
    pub fn new(endpoints: &EndpointConfig) -> RealtimeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        Ok(Self::with_client(client, endpoints))
    }

    /// Share an existing HTTP client.
    pub fn with_client(client: reqwest::Client, endpoints: &EndpointConfig) -> Self {
        Self {
            client,
            mint_url: endpoints.mint_url.clone(),
            api_key: endpoints.api_key.clone(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn mint(&self, config: &RealtimeConfig) -> RealtimeResult<EphemeralCredential> {
        let body = MintRequest {
            session: SessionConfig::for_credential(config),
        };

        let mut request = self.client.post(&self.mint_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose());
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Credential request failed");
            RealtimeError::signaling(SignalingStage::Credential, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::signaling(
                SignalingStage::Credential,
                format!("Failed to mint client secret: {}", status.as_u16()),
            ));
        }

        let minted: MintResponse = response.json().await.map_err(|e| {
            RealtimeError::signaling(
                SignalingStage::Credential,
                format!("Invalid client secret response: {e}"),
            )
        })?;

        match minted.value.filter(|v| !v.is_empty()) {
            Some(value) => {
                debug!(expires_at = ?minted.expires_at, "Minted ephemeral credential");
                Ok(EphemeralCredential::new(value, minted.expires_at))
            }
            None => Err(RealtimeError::signaling(
                SignalingStage::Credential,
                "No client secret returned",
            )),
        }
    }
}
