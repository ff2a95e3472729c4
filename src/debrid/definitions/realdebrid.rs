//! Real-Debrid provider implementation
//!
//! # API
//!
//! Bearer-authenticated REST API at `https://api.real-debrid.com/rest/1.0`.
//! Errors come back as `{"error": "...", "error_code": N}` with a 4xx status.
//!
//! Real-Debrid does not start anything until files are selected, and
//! `links` only covers selected files, ordered by file id.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ProviderSettings;
use crate::debrid::types::{AddedRelease, CacheStatus, DirectLink, MediaFileEntry, ReleaseInfo};
use crate::debrid::{Provider, ProviderKind};
use crate::error::{DebridError, Result};
use crate::services::provider_client::{ProviderClient, RateLimitConfig};

pub const DEFAULT_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: i64,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    files: Vec<TorrentFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TorrentFile {
    id: u32,
    path: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    selected: u8,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    filesize: u64,
    download: String,
}

fn map_status(status: &str) -> CacheStatus {
    match status {
        "downloaded" => CacheStatus::Cached,
        "queued" | "magnet_conversion" | "waiting_files_selection" => CacheStatus::Queued,
        "downloading" | "compressing" | "uploading" => CacheStatus::Downloading,
        "error" | "magnet_error" | "virus" | "dead" => CacheStatus::Error,
        _ => CacheStatus::Unknown,
    }
}

/// Real-Debrid provider
pub struct RealDebridProvider {
    name: String,
    api_key: String,
    base_url: String,
    http: ProviderClient,
}

impl RealDebridProvider {
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
                RateLimitConfig::for_realdebrid(),
                settings.request_timeout,
            )?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into a provider error
    async fn check(&self, response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiError>(&body) {
            Ok(err) if !err.error.is_empty() => format!("{} (code {})", err.error, err.error_code),
            _ => format!("HTTP {status}"),
        };
        Err(DebridError::provider(&self.name, format!("{action} failed: {message}")))
    }
}

#[async_trait]
impl Provider for RealDebridProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RealDebrid
    }

    async fn add_magnet(&self, magnet: &str) -> Result<AddedRelease> {
        let response = self
            .http
            .send(
                self.http
                    .inner()
                    .post(self.url("/torrents/addMagnet"))
                    .bearer_auth(&self.api_key)
                    .form(&[("magnet", magnet.trim())]),
            )
            .await?;
        let response = self.check(response, "add magnet").await?;
        let added: AddResponse = self.http.read_json(response).await?;
        info!(provider = %self.name, release_id = %added.id, "Magnet added");
        Ok(AddedRelease { id: added.id })
    }

    async fn add_torrent_file(&self, bytes: Vec<u8>, filename: &str) -> Result<AddedRelease> {
        if bytes.is_empty() {
            return Err(DebridError::InvalidCandidate("torrent data is empty".to_string()));
        }
        let response = self
            .http
            .send(
                self.http
                    .inner()
                    .put(self.url("/torrents/addTorrent"))
                    .bearer_auth(&self.api_key)
                    .header(reqwest::header::CONTENT_TYPE, "application/x-bittorrent")
                    .body(bytes),
            )
            .await?;
        let response = self.check(response, "add torrent").await?;
        let added: AddResponse = self.http.read_json(response).await?;
        info!(provider = %self.name, release_id = %added.id, filename = %filename, "Torrent file added");
        Ok(AddedRelease { id: added.id })
    }

    async fn release_info(&self, release_id: &str) -> Result<ReleaseInfo> {
        let url = self.url(&format!("/torrents/info/{}", release_id.trim()));
        let response = self
            .http
            .send_with_retry("realdebrid.info", || {
                self.http.inner().get(&url).bearer_auth(&self.api_key)
            })
            .await?;
        let response = self.check(response, "get release info").await?;
        let torrent: TorrentInfo = self.http.read_json(response).await?;

        let files = torrent
            .files
            .into_iter()
            .map(|f| MediaFileEntry {
                id: f.id,
                path: f.path.trim_start_matches('/').to_string(),
                bytes: f.bytes,
                selected: f.selected == 1,
            })
            .collect::<Vec<_>>();

        debug!(
            provider = %self.name,
            release_id = %torrent.id,
            status = %torrent.status,
            files = files.len(),
            links = torrent.links.len(),
            "Release info"
        );

        Ok(ReleaseInfo {
            id: torrent.id,
            filename: torrent.filename,
            info_hash: torrent.hash.to_ascii_lowercase(),
            total_bytes: torrent.bytes,
            status: Some(map_status(&torrent.status)),
            raw_status: torrent.status,
            files,
            links: torrent.links,
        })
    }

    async fn select_files(&self, release_id: &str, file_ids: &str) -> Result<()> {
        let url = self.url(&format!("/torrents/selectFiles/{}", release_id.trim()));
        let response = self
            .http
            .send_with_retry("realdebrid.select", || {
                self.http
                    .inner()
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .form(&[("files", file_ids)])
            })
            .await?;
        self.check(response, "select files").await?;
        debug!(provider = %self.name, release_id = %release_id, files = %file_ids, "Files selected");
        Ok(())
    }

    async fn resolve_link(&self, link: &str) -> Result<DirectLink> {
        let response = self
            .http
            .send_with_retry("realdebrid.unrestrict", || {
                self.http
                    .inner()
                    .post(self.url("/unrestrict/link"))
                    .bearer_auth(&self.api_key)
                    .form(&[("link", link.trim())])
            })
            .await?;
        let response = self.check(response, "unrestrict link").await?;
        let unrestricted: UnrestrictResponse = self.http.read_json(response).await?;
        Ok(DirectLink {
            url: unrestricted.download,
            filename: unrestricted.filename,
            filesize: unrestricted.filesize,
        })
    }

    async fn delete_release(&self, release_id: &str) -> Result<()> {
        let url = self.url(&format!("/torrents/delete/{}", release_id.trim()));
        let response = self
            .http
            .send_with_retry("realdebrid.delete", || {
                self.http.inner().delete(&url).bearer_auth(&self.api_key)
            })
            .await?;
        self.check(response, "delete release").await?;
        info!(provider = %self.name, release_id = %release_id, "Release deleted");
        Ok(())
    }
}
