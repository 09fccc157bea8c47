use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::error::GenerationError;
use crate::transport::{
    GeminiTransport, OpenRouterTransport, ScriptBridgeTransport, UpstreamKind, UpstreamTransport,
};

pub const SHARED_KEY_VAR: &str = "OWNER_GEMINI_KEY";
pub const PLACEHOLDER_KEY: &str = "PLACEHOLDER_API_KEY";

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-2.5-flash-image";
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8788";
pub const DEFAULT_BIND: &str = "127.0.0.1:8788";
pub const DEFAULT_HOME: &str = ".atelier";
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 120.0;

/// Upstream endpoints shared by the client and the proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub kind: UpstreamKind,
    pub model: String,
    pub gemini_api_base: String,
    pub script_url: Option<String>,
    pub openrouter_api_base: String,
    pub openrouter_model: String,
    pub request_timeout: Duration,
}

impl UpstreamConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let kind = match lookup("ATELIER_UPSTREAM") {
            Some(raw) => raw.parse::<UpstreamKind>().map_err(anyhow::Error::msg)?,
            None => UpstreamKind::default(),
        };
        let script_url = lookup("ATELIER_SCRIPT_URL");
        if kind == UpstreamKind::Script && script_url.is_none() {
            bail!("ATELIER_SCRIPT_URL must be set when ATELIER_UPSTREAM=script");
        }
        let timeout_s = match lookup("ATELIER_REQUEST_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<f64>() {
                Ok(value) if value > 0.0 && value.is_finite() => value,
                _ => bail!("ATELIER_REQUEST_TIMEOUT_SECS must be a positive number, got '{raw}'"),
            },
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };
        Ok(Self {
            kind,
            model: lookup("ATELIER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_api_base: lookup("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            script_url,
            openrouter_api_base: lookup("OPENROUTER_API_BASE")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_API_BASE.to_string()),
            openrouter_model: lookup("ATELIER_OPENROUTER_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
            request_timeout: Duration::from_secs_f64(timeout_s),
        })
    }

    /// Transport used for direct-mode calls with a user key.
    pub fn direct_transport(&self) -> Box<dyn UpstreamTransport> {
        Box::new(GeminiTransport::new(
            &self.gemini_api_base,
            &self.model,
            self.request_timeout,
        ))
    }

    /// Transport the proxy forwards through, per `kind`.
    pub fn proxy_transport(&self) -> Box<dyn UpstreamTransport> {
        match (self.kind, self.script_url.as_deref()) {
            (UpstreamKind::Script, Some(url)) => Box::new(ScriptBridgeTransport::new(
                url,
                &self.model,
                self.request_timeout,
            )),
            (UpstreamKind::OpenRouter, _) => Box::new(OpenRouterTransport::new(
                &self.openrouter_api_base,
                &self.openrouter_model,
                self.request_timeout,
            )),
            _ => self.direct_transport(),
        }
    }
}

/// Proxy-side settings: the shared credential plus upstream selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub shared_key: Option<String>,
    pub bind: String,
    pub upstream: UpstreamConfig,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            shared_key: lookup(SHARED_KEY_VAR),
            bind: lookup("ATELIER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            upstream: UpstreamConfig::from_lookup(&lookup)?,
        })
    }

    /// The shared credential, or a configuration error when it is absent or
    /// still the placeholder value.
    pub fn shared_credential(&self) -> Result<&str, GenerationError> {
        match self.shared_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && key != PLACEHOLDER_KEY => Ok(key),
            _ => Err(GenerationError::Configuration(format!(
                "The server has no {SHARED_KEY_VAR} configured. Set this environment variable for the proxy."
            ))),
        }
    }
}

/// Client-side settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub home: PathBuf,
    pub proxy_url: String,
    pub upstream: UpstreamConfig,
}

impl ClientConfig {
    pub fn from_env(home_override: Option<PathBuf>) -> Result<Self> {
        Self::from_lookup(home_override, non_empty_env)
    }

    pub fn from_lookup(
        home_override: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let home = home_override
            .or_else(|| lookup("ATELIER_HOME").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));
        Ok(Self {
            home,
            proxy_url: lookup("ATELIER_PROXY_URL").unwrap_or_else(|| DEFAULT_PROXY_URL.to_string()),
            upstream: UpstreamConfig::from_lookup(&lookup)?,
        })
    }

    pub fn local_storage_path(&self) -> PathBuf {
        self.home.join("local_storage.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.home.join("history.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.home.join("events.jsonl")
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
