//! Application configuration management

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// How verification is spread over several enabled providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MultiProviderMode {
    /// Race every provider, first cached result wins
    #[default]
    Fastest,
    /// Verify everywhere, keep the highest-priority cached result
    Preferred,
    /// One provider at a time in priority order
    Sequential,
}

impl FromStr for MultiProviderMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "fastest" | "race" => Ok(Self::Fastest),
            "preferred" | "priority" => Ok(Self::Preferred),
            "sequential" => Ok(Self::Sequential),
            other => bail!("unknown multi-provider mode: {other}"),
        }
    }
}

impl fmt::Display for MultiProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fastest => "fastest",
            Self::Preferred => "preferred",
            Self::Sequential => "sequential",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// One configured debrid account
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Vendor id as written in the config (e.g. "realdebrid")
    pub kind: String,
    /// Instance name, defaults to the vendor id
    pub name: String,
    pub api_key: String,
    pub enabled: bool,
    pub request_timeout: Duration,
    /// API base URL override
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn new(kind: &str, api_key: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: kind.to_string(),
            api_key: api_key.to_string(),
            enabled: !api_key.trim().is_empty(),
            request_timeout: Duration::from_secs(30),
            base_url: None,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Providers in priority order (first = highest)
    pub providers: Vec<ProviderSettings>,

    pub multi_provider_mode: MultiProviderMode,

    /// Path to ffprobe, `None` disables track probing
    pub ffprobe_path: Option<String>,

    /// Timeout for individual provider API calls
    pub request_timeout: Duration,

    /// Timeout for downloading `.torrent` files from indexers
    pub torrent_download_timeout: Duration,

    /// Timeout for background track probes
    pub track_probe_timeout: Duration,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |key: &str, default: u64| -> Result<Duration> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Duration::from_secs)
                    .with_context(|| format!("Invalid {key}")),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let request_timeout = seconds("DEBRID_REQUEST_TIMEOUT_SECS", 30)?;

        let mut providers = Vec::new();
        for entry in lookup("DEBRID_PROVIDERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let mut parts = entry.splitn(3, ':');
            let kind = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
            let api_key = parts.next().unwrap_or_default().trim().to_string();
            let name = parts
                .next()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| kind.clone());

            let env_kind = kind.replace('-', "_").to_ascii_uppercase();
            let enabled_override = lookup(&format!("DEBRID_{env_kind}_ENABLED"))
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"));

            providers.push(ProviderSettings {
                enabled: enabled_override.unwrap_or(true) && !api_key.is_empty(),
                base_url: lookup(&format!("DEBRID_{env_kind}_BASE_URL"))
                    .filter(|v| !v.trim().is_empty()),
                request_timeout,
                kind,
                name,
                api_key,
            });
        }

        Ok(Self {
            providers,

            multi_provider_mode: lookup("DEBRID_MULTI_PROVIDER_MODE")
                .unwrap_or_default()
                .parse()
                .context("Invalid DEBRID_MULTI_PROVIDER_MODE")?,

            ffprobe_path: match lookup("FFPROBE_PATH") {
                Some(path) if path.trim().is_empty() => None,
                Some(path) => Some(path.trim().to_string()),
                None => Some("ffprobe".to_string()),
            },

            request_timeout,

            torrent_download_timeout: seconds("TORRENT_DOWNLOAD_TIMEOUT_SECS", 60)?,

            track_probe_timeout: seconds("TRACK_PROBE_TIMEOUT_SECS", 30)?,

            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some("pretty") | Some("text") => LogFormat::Pretty,
                _ => LogFormat::Json,
            },
        })
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled)
    }
}
