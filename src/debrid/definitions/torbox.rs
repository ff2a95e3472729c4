//! TorBox provider implementation
//!
//! # API
//!
//! Bearer-authenticated REST API at `https://api.torbox.app/v1/api`. Every
//! response is wrapped in `{success, detail, data}`.
//!
//! TorBox starts downloading as soon as a torrent is created and always
//! fetches every file, so file selection is a no-op. Download links are
//! generated on demand; listings expose internal `"{torrent_id}:{file_id}"`
//! references that [`Provider::resolve_link`] turns into URLs.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ProviderSettings;
use crate::debrid::types::{AddedRelease, CacheStatus, DirectLink, MediaFileEntry, ReleaseInfo};
use crate::debrid::{Provider, ProviderKind};
use crate::error::{DebridError, Result};
use crate::services::provider_client::{ProviderClient, RateLimitConfig};

pub const DEFAULT_BASE_URL: &str = "https://api.torbox.app/v1/api";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    detail: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreateData {
    torrent_id: u64,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct TorrentData {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    download_state: String,
    #[serde(default)]
    download_finished: bool,
    #[serde(default)]
    download_present: bool,
    #[serde(default)]
    files: Vec<TorrentFile>,
}

#[derive(Debug, Deserialize)]
struct TorrentFile {
    id: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    short_name: String,
    #[serde(default)]
    size: u64,
}

fn map_status(torrent: &TorrentData) -> CacheStatus {
    if torrent.download_finished && torrent.download_present {
        return CacheStatus::Cached;
    }
    let state = torrent.download_state.to_ascii_lowercase();
    match state.as_str() {
        "queued" | "metadl" => CacheStatus::Queued,
        s if s.starts_with("checking") => CacheStatus::Queued,
        "downloading" => CacheStatus::Downloading,
        s if s.starts_with("stalled") => CacheStatus::Downloading,
        "error" | "failed" => CacheStatus::Error,
        _ => CacheStatus::Unknown,
    }
}

/// Parse an internal `"{torrent_id}:{file_id}"` link
fn parse_internal_link(link: &str) -> Option<(&str, &str)> {
    let (torrent_id, file_id) = link.trim().split_once(':')?;
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    (numeric(torrent_id) && numeric(file_id)).then_some((torrent_id, file_id))
}

/// TorBox provider
pub struct TorBoxProvider {
    name: String,
    api_key: String,
    base_url: String,
    http: ProviderClient,
}

impl TorBoxProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            name: settings.name.clone(),
            api_key: settings.api_key.trim().to_string(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http: ProviderClient::new(
                &settings.name,
                RateLimitConfig::for_torbox(),
                settings.request_timeout,
            )?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response, action: &str) -> Result<T> {
        let envelope: Envelope<T> = self.http.read_json(response).await?;
        if !envelope.success {
            return Err(DebridError::provider(
                &self.name,
                format!("{action} failed: {}", envelope.detail),
            ));
        }
        envelope
            .data
            .ok_or_else(|| DebridError::decode(&self.name, format!("{action}: missing data")))
    }

    async fn create(&self, form: reqwest::multipart::Form, action: &str) -> Result<AddedRelease> {
        let response = self
            .http
            .send(
                self.http
                    .inner()
                    .post(self.url("/torrents/createtorrent"))
                    .bearer_auth(&self.api_key)
                    .multipart(form),
            )
            .await?;
        let created: CreateData = self.decode(response, action).await?;
        info!(
            provider = %self.name,
            release_id = created.torrent_id,
            info_hash = %created.hash,
            "Torrent created"
        );
        Ok(AddedRelease {
            id: created.torrent_id.to_string(),
        })
    }
}

#[async_trait]
impl Provider for TorBoxProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::TorBox
    }

    async fn add_magnet(&self, magnet: &str) -> Result<AddedRelease> {
        let form = reqwest::multipart::Form::new()
            .text("magnet", magnet.trim().to_string())
            .text("allow_zip", "false");
        self.create(form, "add magnet").await
    }

    async fn add_torrent_file(&self, bytes: Vec<u8>, filename: &str) -> Result<AddedRelease> {
        if bytes.is_empty() {
            return Err(DebridError::InvalidCandidate("torrent data is empty".to_string()));
        }
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/x-bittorrent")
            .map_err(|e| DebridError::transport(&self.name, e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("allow_zip", "false");
        self.create(form, "add torrent").await
    }

    async fn release_info(&self, release_id: &str) -> Result<ReleaseInfo> {
        let url = self.url("/torrents/mylist");
        let response = self
            .http
            .send_with_retry("torbox.mylist", || {
                self.http
                    .inner()
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("id", release_id.trim()), ("bypass_cache", "true")])
            })
            .await?;
        let torrent: TorrentData = self.decode(response, "get release info").await?;
        let status = map_status(&torrent);

        let mut files = Vec::with_capacity(torrent.files.len());
        let mut links = Vec::new();
        for file in &torrent.files {
            let path = if file.name.is_empty() { &file.short_name } else { &file.name };
            files.push(MediaFileEntry {
                id: file.id,
                path: path.clone(),
                bytes: file.size,
                selected: true,
            });
            if status.is_cached() {
                links.push(format!("{}:{}", torrent.id, file.id));
            }
        }

        debug!(
            provider = %self.name,
            release_id = torrent.id,
            state = %torrent.download_state,
            status = %status,
            files = files.len(),
            "Release info"
        );

        Ok(ReleaseInfo {
            id: torrent.id.to_string(),
            filename: torrent.name,
            info_hash: torrent.hash.to_ascii_lowercase(),
            total_bytes: torrent.size,
            status: Some(status),
            raw_status: torrent.download_state,
            files,
            links,
        })
    }

    async fn select_files(&self, release_id: &str, _file_ids: &str) -> Result<()> {
        debug!(provider = %self.name, release_id = %release_id, "File selection is automatic");
        Ok(())
    }

    async fn resolve_link(&self, link: &str) -> Result<DirectLink> {
        let (torrent_id, file_id) = parse_internal_link(link).ok_or_else(|| {
            DebridError::provider(&self.name, format!("invalid download reference: {link}"))
        })?;
        let url = self.url("/torrents/requestdl");
        let response = self
            .http
            .send_with_retry("torbox.requestdl", || {
                self.http.inner().get(&url).query(&[
                    ("token", self.api_key.as_str()),
                    ("torrent_id", torrent_id),
                    ("file_id", file_id),
                ])
            })
            .await?;
        let download: String = self.decode(response, "request download").await?;
        let filename = download
            .split('?')
            .next()
            .and_then(|p| p.rsplit('/').next())
            .map(|name| urlencoding::decode(name).map(|c| c.into_owned()).unwrap_or_else(|_| name.to_string()))
            .unwrap_or_default();
        Ok(DirectLink {
            url: download,
            filename,
            filesize: 0,
        })
    }

    async fn delete_release(&self, release_id: &str) -> Result<()> {
        let torrent_id: u64 = release_id.trim().parse().map_err(|_| {
            DebridError::provider(&self.name, format!("invalid release id: {release_id}"))
        })?;
        let response = self
            .http
            .send_with_retry("torbox.delete", || {
                self.http
                    .inner()
                    .post(self.url("/torrents/controltorrent"))
                    .bearer_auth(&self.api_key)
                    .json(&serde_json::json!({ "torrent_id": torrent_id, "operation": "delete" }))
            })
            .await?;
        let envelope: Envelope<serde_json::Value> = self.http.read_json(response).await?;
        if !envelope.success {
            return Err(DebridError::provider(
                &self.name,
                format!("delete release failed: {}", envelope.detail),
            ));
        }
        info!(provider = %self.name, release_id = %release_id, "Release deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(state: &str, finished: bool, present: bool) -> TorrentData {
        TorrentData {
            id: 1,
            name: String::new(),
            hash: String::new(),
            size: 0,
            download_state: state.to_string(),
            download_finished: finished,
            download_present: present,
            files: Vec::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(&torrent("cached", true, true)), CacheStatus::Cached);
        assert_eq!(map_status(&torrent("uploading", true, false)), CacheStatus::Unknown);
        assert_eq!(map_status(&torrent("metaDL", false, false)), CacheStatus::Queued);
        assert_eq!(map_status(&torrent("checkingResumeData", false, false)), CacheStatus::Queued);
        assert_eq!(map_status(&torrent("stalled (no seeds)", false, false)), CacheStatus::Downloading);
        assert_eq!(map_status(&torrent("failed", false, false)), CacheStatus::Error);
    }

    #[test]
    fn test_internal_links() {
        assert_eq!(parse_internal_link("123:4"), Some(("123", "4")));
        assert_eq!(parse_internal_link("https://x/y"), None);
        assert_eq!(parse_internal_link("12:"), None);
    }
}
