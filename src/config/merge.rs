use std::time::Duration;

use crate::core::realtime::{ApiKey, RealtimeResult};

use super::ClientConfig;
use super::env::{apply_env, parse_transport};
use super::yaml::YamlConfig;

/// Build a configuration from defaults, then environment variables, then
/// YAML overrides.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> RealtimeResult<ClientConfig> {
    let mut config = ClientConfig::default();
    apply_env(&mut config)?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(session_yaml) = yaml.session {
        let session = &mut config.session;
        if let Some(model) = session_yaml.model {
            session.model = model;
        }
        if let Some(voice) = session_yaml.voice {
            session.voice = voice;
        }
        if let Some(instructions) = session_yaml.instructions {
            session.instructions = Some(instructions).filter(|text| !text.trim().is_empty());
        }
        if let Some(modalities) = session_yaml.modalities {
            session.modalities = modalities;
        }
        if let Some(enabled) = session_yaml.input_transcription {
            session.input_transcription = enabled;
        }
        if let Some(transport) = session_yaml.transport {
            session.transport = parse_transport(&transport)?;
        }
        if let Some(send) = session_yaml.send_session_update {
            session.send_session_update = send;
        }
    }

    if let Some(mut endpoints_yaml) = yaml.endpoints {
        let endpoints = &mut config.endpoints;
        if let Some(url) = endpoints_yaml.mint_url.take() {
            endpoints.mint_url = url;
        }
        if let Some(key) = endpoints_yaml.api_key.take() {
            endpoints.api_key = Some(ApiKey::new(key));
        }
        if let Some(url) = endpoints_yaml.calls_url.take() {
            endpoints.calls_url = url;
        }
        if let Some(url) = endpoints_yaml.socket_url.take() {
            endpoints.socket_url = url;
        }
        if let Some(servers) = endpoints_yaml.ice_servers.take() {
            endpoints.ice_servers = servers;
        }
        if let Some(ms) = endpoints_yaml.gathering_timeout_ms {
            endpoints.gathering_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = endpoints_yaml.request_timeout_ms {
            endpoints.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = endpoints_yaml.telemetry_interval_ms {
            endpoints.telemetry_interval = Duration::from_millis(ms);
        }
    }

    Ok(config)
}
