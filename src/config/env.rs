use std::env;
use std::time::Duration;

use crate::core::realtime::{ApiKey, RealtimeError, RealtimeResult, TransportKind};

use super::ClientConfig;

/// Read an environment variable, treating empty values as unset.
pub(super) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_millis(name: &str) -> RealtimeResult<Option<Duration>> {
    env_var(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| {
                    RealtimeError::InvalidConfiguration(format!("{name} must be milliseconds: {e}"))
                })
        })
        .transpose()
}

/// Parse a comma separated list, dropping empty items.
pub(super) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub(super) fn parse_transport(value: &str) -> RealtimeResult<TransportKind> {
    TransportKind::parse(value).ok_or_else(|| {
        RealtimeError::InvalidConfiguration(format!(
            "Unknown transport '{value}', expected 'peer' or 'socket'"
        ))
    })
}

/// Apply environment variables on top of `config`.
pub(super) fn apply_env(config: &mut ClientConfig) -> RealtimeResult<()> {
    let session = &mut config.session;
    let endpoints = &mut config.endpoints;

    if let Some(key) = env_var("OPENAI_API_KEY") {
        endpoints.api_key = Some(ApiKey::new(key));
    }
    if let Some(url) = env_var("REALTIME_MINT_URL") {
        endpoints.mint_url = url;
    }
    if let Some(url) = env_var("REALTIME_CALLS_URL") {
        endpoints.calls_url = url;
    }
    if let Some(url) = env_var("REALTIME_SOCKET_URL") {
        endpoints.socket_url = url;
    }
    if let Some(servers) = env_var("REALTIME_ICE_SERVERS") {
        endpoints.ice_servers = split_list(&servers);
    }
    if let Some(timeout) = env_millis("REALTIME_GATHERING_TIMEOUT_MS")? {
        endpoints.gathering_timeout = timeout;
    }
    if let Some(timeout) = env_millis("REALTIME_REQUEST_TIMEOUT_MS")? {
        endpoints.request_timeout = timeout;
    }

    if let Some(model) = env_var("REALTIME_MODEL") {
        session.model = model;
    }
    if let Some(voice) = env_var("REALTIME_VOICE") {
        session.voice = voice;
    }
    if let Some(instructions) = env_var("REALTIME_INSTRUCTIONS") {
        session.instructions = Some(instructions);
    }
    if let Some(transport) = env_var("REALTIME_TRANSPORT") {
        session.transport = parse_transport(&transport)?;
    }

    Ok(())
}
