use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// session:
///   model: "gpt-realtime"
///   voice: "marin"
///   instructions: "You are a helpful assistant."
///   modalities: ["audio", "text"]
///   input_transcription: true
///   transport: "peer"
///   send_session_update: true
///
/// endpoints:
///   mint_url: "http://localhost:3000/session"
///   api_key: "sk-..."
///   calls_url: "https://api.openai.com/v1/realtime/calls"
///   socket_url: "wss://api.openai.com/v1/realtime"
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///   gathering_timeout_ms: 10000
///   request_timeout_ms: 30000
///   telemetry_interval_ms: 1000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub session: Option<SessionYaml>,
    pub endpoints: Option<EndpointsYaml>,
}

/// Per-session options from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub input_transcription: Option<bool>,
    /// "peer" or "socket"
    pub transport: Option<String>,
    pub send_session_update: Option<bool>,
}

/// Endpoints and timing from YAML
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsYaml {
    pub mint_url: Option<String>,
    pub api_key: Option<String>,
    pub calls_url: Option<String>,
    pub socket_url: Option<String>,
    pub ice_servers: Option<Vec<String>>,
    pub gathering_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub telemetry_interval_ms: Option<u64>,
}

impl std::fmt::Debug for EndpointsYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointsYaml")
            .field("mint_url", &self.mint_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("calls_url", &self.calls_url)
            .field("socket_url", &self.socket_url)
            .field("ice_servers", &self.ice_servers)
            .field("gathering_timeout_ms", &self.gathering_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("telemetry_interval_ms", &self.telemetry_interval_ms)
            .finish()
    }
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
