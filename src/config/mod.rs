//! Configuration for the realtime session client
//!
//! Configuration comes from several sources. Priority: YAML > ENV vars >
//! .env values > defaults. The `.env` file is loaded by the binary at startup.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//!
//! # Example
//! ```rust,no_run
//! use realtime_session::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Using {} transport", config.session.transport);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod merge;
mod yaml;

pub use yaml::{EndpointsYaml, SessionYaml, YamlConfig};

use crate::core::realtime::openai::OpenAIRealtimeVoice;
use crate::core::realtime::{EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult};
use crate::utils::url_validation::{
    validate_http_url, validate_ice_server_url, validate_socket_url,
};

/// Client configuration: what to ask for and where to connect.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Options sent with each `connect`
    pub session: RealtimeConfig,
    /// Endpoints, credentials and timing
    pub endpoints: EndpointConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables over defaults.
    pub fn from_env() -> RealtimeResult<Self> {
        merge::merge_config(None)?.finish()
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// # Errors
    /// Returns [`RealtimeError::InvalidConfiguration`] if the file cannot be
    /// read or parsed, an environment variable is malformed, or validation
    /// fails.
    pub fn from_file(path: &PathBuf) -> RealtimeResult<Self> {
        let yaml_config = YamlConfig::from_file(path)
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        merge::merge_config(Some(yaml_config))?.finish()
    }

    /// Canonicalize the voice name, then validate.
    fn finish(mut self) -> RealtimeResult<Self> {
        if let Some(voice) = OpenAIRealtimeVoice::parse(&self.session.voice) {
            self.session.voice = voice.as_str().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    /// Check endpoint URLs, timing and the voice name.
    pub fn validate(&self) -> RealtimeResult<()> {
        let invalid = |field: &str, e: &dyn std::fmt::Display| {
            RealtimeError::InvalidConfiguration(format!("{field}: {e}"))
        };

        let endpoints = &self.endpoints;
        validate_http_url(&endpoints.mint_url).map_err(|e| invalid("mint_url", &e))?;
        validate_http_url(&endpoints.calls_url).map_err(|e| invalid("calls_url", &e))?;
        validate_socket_url(&endpoints.socket_url).map_err(|e| invalid("socket_url", &e))?;
        for server in &endpoints.ice_servers {
            validate_ice_server_url(server).map_err(|e| invalid("ice_servers", &e))?;
        }

        if endpoints.gathering_timeout.is_zero() {
            return Err(invalid("gathering_timeout", &"must be greater than zero"));
        }
        if endpoints.telemetry_interval.is_zero() {
            return Err(invalid("telemetry_interval", &"must be greater than zero"));
        }
        if self.session.model.trim().is_empty() {
            return Err(invalid("model", &"must not be empty"));
        }
        if OpenAIRealtimeVoice::parse(&self.session.voice).is_none() {
            let known: Vec<&str> = OpenAIRealtimeVoice::all().iter().map(|v| v.as_str()).collect();
            return Err(invalid(
                "voice",
                &format!("unknown voice '{}', expected one of {}", self.session.voice, known.join(", ")),
            ));
        }

        Ok(())
    }

    /// Whether a key is configured for the credential endpoint.
    pub fn has_api_key(&self) -> bool {
        self.endpoints.api_key.is_some()
    }
}
