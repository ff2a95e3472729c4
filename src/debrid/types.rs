//! Data model shared by the provider adapters and the resolution pipeline.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute keys understood on a [`ReleaseCandidate`].
pub mod attrs {
    pub const INFO_HASH: &str = "infoHash";
    pub const PROVIDER: &str = "provider";
    pub const TARGET_SEASON: &str = "targetSeason";
    pub const TARGET_EPISODE: &str = "targetEpisode";
    pub const TARGET_EPISODE_CODE: &str = "targetEpisodeCode";
    pub const ABSOLUTE_EPISODE: &str = "absoluteEpisodeNumber";
    pub const IS_DAILY: &str = "isDaily";
    pub const TARGET_AIR_DATE: &str = "targetAirDate";
    pub const TITLE_NAME: &str = "titleName";
    pub const PRERESOLVED: &str = "preresolved";
    pub const STREAM_URL: &str = "stream_url";
    pub const TORRENT_URL: &str = "torrentURL";
    pub const TRACKER: &str = "tracker";
    pub const RAW_TITLE: &str = "raw_title";
}

/// A release discovered by a scraper. Never mutated after construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseCandidate {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ReleaseCandidate {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Trimmed, non-empty attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_magnet(&self) -> bool {
        self.link.trim().to_ascii_lowercase().starts_with("magnet:")
    }

    pub fn is_preresolved(&self) -> bool {
        self.attribute(attrs::PRERESOLVED)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    /// Lowercase info hash from the attributes, or from the magnet `xt` parameter.
    pub fn info_hash(&self) -> Option<String> {
        if let Some(hash) = self.attribute(attrs::INFO_HASH) {
            return Some(hash.to_ascii_lowercase());
        }
        if !self.is_magnet() {
            return None;
        }
        let parsed = url::Url::parse(self.link.trim()).ok()?;
        parsed
            .query_pairs()
            .filter(|(key, _)| key == "xt")
            .find_map(|(_, value)| {
                let lower = value.to_ascii_lowercase();
                lower
                    .strip_prefix("urn:btih:")
                    .filter(|hash| !hash.is_empty())
                    .map(str::to_string)
            })
    }

    /// Magnet link to submit, rebuilt from the info hash when the link is not a magnet.
    pub fn magnet_uri(&self) -> Option<String> {
        if self.is_magnet() {
            return Some(self.link.trim().to_string());
        }
        self.attribute(attrs::INFO_HASH)
            .map(|hash| format!("magnet:?xt=urn:btih:{}", hash.to_ascii_lowercase()))
    }

    /// HTTP(S) URL serving a `.torrent` file, if any.
    pub fn torrent_url(&self) -> Option<&str> {
        if let Some(url) = self.attribute(attrs::TORRENT_URL) {
            return Some(url);
        }
        let link = self.link.trim();
        (link.starts_with("http://") || link.starts_with("https://")).then_some(link)
    }

    /// Direct stream URL of a pre-resolved candidate.
    pub fn stream_url(&self) -> Option<&str> {
        self.attribute(attrs::STREAM_URL)
            .or_else(|| self.attribute(attrs::TORRENT_URL))
            .or_else(|| {
                let link = self.link.trim();
                (!link.is_empty() && !self.is_magnet()).then_some(link)
            })
    }

    pub fn provider_hint(&self) -> Option<&str> {
        self.attribute(attrs::PROVIDER)
    }
}

/// Cache state of a release as reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Queued,
    Downloading,
    Cached,
    NotCached,
    Error,
    Unknown,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Queued => "queued",
            CacheStatus::Downloading => "downloading",
            CacheStatus::Cached => "cached",
            CacheStatus::NotCached => "not_cached",
            CacheStatus::Error => "error",
            CacheStatus::Unknown => "unknown",
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, CacheStatus::Cached)
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file inside a provider release. Ids are provider-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFileEntry {
    pub id: u32,
    pub path: String,
    pub bytes: u64,
    pub selected: bool,
}

impl MediaFileEntry {
    pub fn new(id: u32, path: impl Into<String>, bytes: u64) -> Self {
        Self {
            id,
            path: path.into(),
            bytes,
            selected: false,
        }
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedRelease {
    pub id: String,
}

/// Normalised view of a provider release.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReleaseInfo {
    pub id: String,
    pub filename: String,
    pub info_hash: String,
    pub total_bytes: u64,
    pub status: Option<CacheStatus>,
    /// Vendor status string, kept for error messages.
    pub raw_status: String,
    pub files: Vec<MediaFileEntry>,
    /// Provider links, ordered by selected file id.
    pub links: Vec<String>,
}

impl ReleaseInfo {
    pub fn status(&self) -> CacheStatus {
        self.status.unwrap_or(CacheStatus::Unknown)
    }
}

/// A consumable URL produced from a provider link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLink {
    pub url: String,
    pub filename: String,
    pub filesize: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub index: u32,
    pub language: String,
    pub codec: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub index: u32,
    pub language: String,
    pub codec: String,
    pub title: String,
    pub forced: bool,
    /// Image-based formats that cannot be rendered as text.
    pub is_bitmap: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitmap_type: Option<String>,
}

/// Outcome of a single cache verification. Built fresh per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheVerificationResult {
    pub healthy: bool,
    pub status: CacheStatus,
    pub provider: String,
    pub info_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub subtitle_tracks: Vec<SubtitleTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_probe_error: Option<String>,
    pub tracks_loading: bool,
}

impl CacheVerificationResult {
    pub fn new(provider: &str, info_hash: &str, status: CacheStatus) -> Self {
        Self {
            healthy: status.is_cached(),
            status,
            provider: provider.to_string(),
            info_hash: info_hash.to_string(),
            error_message: None,
            audio_tracks: Vec::new(),
            subtitle_tracks: Vec::new(),
            track_probe_error: None,
            tracks_loading: false,
        }
    }

    pub fn failed(provider: &str, info_hash: &str, status: CacheStatus, message: String) -> Self {
        Self {
            error_message: Some(message),
            ..Self::new(provider, info_hash, status)
        }
    }
}

/// What the streaming layer needs to play a resolved release.
///
/// The provider-side release referenced here is owned by the caller and is
/// not deleted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackResolution {
    /// `/debrid/{provider}/{release_id}[/file/{file_id}][/{filename}]`, or
    /// the stream URL itself for pre-resolved candidates.
    pub path: String,
    pub download_url: String,
    pub health_status: CacheStatus,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u32>,
}
