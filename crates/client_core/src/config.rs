use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use url::Url;

use crate::stream::ReconnectPolicy;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTransport {
    WebSocket,
    EventSource,
}

impl PushTransport {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ws" | "wss" | "websocket" => Some(PushTransport::WebSocket),
            "sse" | "eventsource" | "event-source" => Some(PushTransport::EventSource),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_indexer_url: String,
    pub file_api_root: String,
    pub push_transport: PushTransport,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_indexer_url: "http://127.0.0.1:4000/".into(),
            file_api_root: "http://127.0.0.1:4001".into(),
            push_transport: PushTransport::EventSource,
            reconnect_attempts: 8,
            reconnect_delay_ms: 500,
        }
    }
}

impl ClientSettings {
    pub fn indexer_url(&self) -> anyhow::Result<Url> {
        parse_http_url(&self.api_indexer_url)
            .with_context(|| format!("invalid indexer url '{}'", self.api_indexer_url))
    }

    pub fn file_api_url(&self) -> anyhow::Result<Url> {
        parse_http_url(&self.file_api_root)
            .with_context(|| format!("invalid file api root '{}'", self.file_api_root))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

fn parse_http_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!("url must start with http:// or https://, got {other}://")),
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

/// Defaults, then the optional settings file, then environment overrides.
pub fn load_settings_from(path: &Path) -> ClientSettings {
    load_settings_with(path, |key| std::env::var(key).ok())
}

fn load_settings_with(path: &Path, var: impl Fn(&str) -> Option<String>) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }
    apply_overrides(&mut settings, var);

    settings
}

fn apply_file(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let text = |key: &str| {
        file_cfg.get(key).map(|value| match value {
            toml::Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    };

    if let Some(v) = text("api_indexer_url") {
        settings.api_indexer_url = v;
    }
    if let Some(v) = text("file_api_root") {
        settings.file_api_root = v;
    }
    if let Some(v) = text("push_transport").as_deref().and_then(PushTransport::parse) {
        settings.push_transport = v;
    }
    if let Some(v) = text("reconnect_attempts").and_then(|v| v.parse().ok()) {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = text("reconnect_delay_ms").and_then(|v| v.parse().ok()) {
        settings.reconnect_delay_ms = v;
    }
}

fn apply_overrides(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("API_INDEXER_URL") {
        settings.api_indexer_url = v;
    }
    if let Some(v) = var("APP__API_INDEXER_URL") {
        settings.api_indexer_url = v;
    }

    if let Some(v) = var("FILE_API_ROOT") {
        settings.file_api_root = v;
    }
    if let Some(v) = var("APP__FILE_API_ROOT") {
        settings.file_api_root = v;
    }

    if let Some(v) = var("APP__PUSH_TRANSPORT").as_deref().and_then(PushTransport::parse) {
        settings.push_transport = v;
    }

    if let Some(v) = var("APP__RECONNECT_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.reconnect_attempts = parsed;
        }
    }
    if let Some(v) = var("APP__RECONNECT_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_delay_ms = parsed;
        }
    }
}
