use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::trace;

use crate::error::ConfigError;

/// Interval used when a probe does not configure one (or configures zero)
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

/// A single probe target as written in the configuration file
#[derive(Clone, Deserialize)]
pub struct ProbeConfig {
    pub name: String,
    pub broker_url: String,
    pub topic: String,
    pub client_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default)]
    pub ca_chain: Option<PathBuf>,
    #[serde(default)]
    pub messages: usize,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub interval: Option<Duration>,

    /// Budget for connecting both clients and subscribing (default: interval / 3)
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub setup_timeout: Option<Duration>,

    /// Budget for publishing and collecting the batch (default: interval / 3)
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub probe_timeout: Option<Duration>,
}

impl std::fmt::Debug for ProbeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeConfig")
            .field("name", &self.name)
            .field("broker_url", &self.broker_url)
            .field("topic", &self.topic)
            .field("client_prefix", &self.client_prefix)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_cert", &self.client_cert)
            .field("client_key", &self.client_key)
            .field("ca_chain", &self.ca_chain)
            .field("messages", &self.messages)
            .field("interval", &self.interval)
            .field("setup_timeout", &self.setup_timeout)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

/// Paths to the TLS material of a probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_chain: Option<PathBuf>,
}

/// A probe target with all defaults applied
#[derive(Debug, Clone)]
pub struct ResolvedProbeConfig {
    pub name: String,
    pub broker_url: String,
    pub topic: String,
    pub client_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: TlsFiles,
    pub messages: usize,
    pub interval: Duration,
    pub setup_timeout: Duration,
    pub probe_timeout: Duration,
}

impl ProbeConfig {
    /// Apply defaults: a missing or zero interval becomes [`DEFAULT_INTERVAL`],
    /// and both timeouts default to a third of the effective interval.
    pub fn resolve(self) -> ResolvedProbeConfig {
        let interval = self
            .interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or(DEFAULT_INTERVAL);
        let third = interval / 3;

        ResolvedProbeConfig {
            name: self.name,
            broker_url: self.broker_url,
            topic: self.topic,
            client_prefix: self.client_prefix,
            username: self.username.filter(|username| !username.is_empty()),
            password: self.password,
            tls: TlsFiles {
                client_cert: self.client_cert,
                client_key: self.client_key,
                ca_chain: self.ca_chain,
            },
            messages: self.messages,
            interval,
            setup_timeout: self.setup_timeout.unwrap_or(third),
            probe_timeout: self.probe_timeout.unwrap_or(third),
        }
    }
}

/// Read and parse the configuration file.
///
/// Files ending in `.yaml`/`.yml` are parsed as YAML, `.json` as JSON and
/// everything else as TOML.
pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(path, &file_content).inspect(|config| trace!("loaded config: {config:?}"))
}

fn parse_config(path: &Path, content: &str) -> Result<Config, ConfigError> {
    let format = ConfigFormat::from_path(path);
    trace!("parsing {} as {format:?}", path.display());

    let parsed = match format {
        ConfigFormat::Yaml => serde_yml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// `.yaml`/`.yml` and `.json` by extension, TOML otherwise
    fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yaml" | "yml") => ConfigFormat::Yaml,
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDuration>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDuration::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(RawDuration::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Parse a Go-style duration such as `"1m30s"`, `"500ms"` or `"1.5h"`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total_nanos = 0f64;
    let mut rest = text;

    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_end == 0 {
            return Err(format!("invalid duration '{input}': expected a number"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("invalid duration '{input}'"))?;
        rest = &rest[number_end..];

        let unit_end = rest.find(is_number).unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration '{input}'")),
            unit => return Err(format!("unknown unit '{unit}' in duration '{input}'")),
        };
        rest = &rest[unit_end..];

        total_nanos += value * nanos_per_unit;
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
