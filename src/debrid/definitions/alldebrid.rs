//! AllDebrid provider implementation
//!
//! # API
//!
//! Bearer-authenticated REST API at `https://api.alldebrid.com/v4`. Every
//! response is wrapped in `{status, data, error}`; magnet status is only
//! served with the nested file tree on the `v4.1` endpoint.
//!
//! # Quirks
//!
//! - Files are processed automatically, so file selection is a no-op
//! - `data.magnets` is an object when querying one id and an array otherwise
//! - `/link/unlock` may answer with `delayed`, meaning the link is not ready yet

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ProviderSettings;
use crate::debrid::types::{AddedRelease, CacheStatus, DirectLink, MediaFileEntry, ReleaseInfo};
use crate::debrid::{Provider, ProviderKind};
use crate::error::{DebridError, Result};
use crate::services::provider_client::{ProviderClient, RateLimitConfig};

pub const DEFAULT_BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "librarian";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl<T> Envelope<T> {
    fn into_data(self, provider: &str, action: &str) -> Result<T> {
        if self.status != "success" {
            let message = self
                .error
                .map(|e| format!("{} ({})", e.message, e.code))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(DebridError::provider(provider, format!("{action} failed: {message}")));
        }
        self.data
            .ok_or_else(|| DebridError::decode(provider, format!("{action}: missing data")))
    }
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default, alias = "files")]
    magnets: Vec<UploadedMagnet>,
}

#[derive(Debug, Deserialize)]
struct UploadedMagnet {
    id: Option<u64>,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    ready: bool,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    magnets: MagnetsField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MagnetsField {
    One(Box<MagnetStatus>),
    Many(Vec<MagnetStatus>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MagnetStatus {
    id: u64,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    links: Vec<FlatLink>,
    #[serde(default)]
    files: Vec<FileNode>,
}

/// v4 flat link list
#[derive(Debug, Deserialize)]
struct FlatLink {
    link: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: u64,
}

/// v4.1 nested tree node: name, size, link, entries
#[derive(Debug, Deserialize)]
struct FileNode {
    n: String,
    #[serde(default)]
    s: u64,
    #[serde(default)]
    l: String,
    #[serde(default)]
    e: Vec<FileNode>,
}

#[derive(Debug, Deserialize)]
struct UnlockData {
    #[serde(default)]
    link: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    filesize: u64,
    #[serde(default)]
    delayed: u64,
}

#[derive(Debug, Deserialize)]
struct InstantData {
    #[serde(default)]
    magnets: Vec<InstantMagnet>,
}

#[derive(Debug, Deserialize)]
struct InstantMagnet {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    instant: bool,
}

/// Map AllDebrid numeric status codes
fn map_status_code(code: i64) -> CacheStatus {
    match code {
        4 => CacheStatus::Cached,
        0 => CacheStatus::Queued,
        1..=3 => CacheStatus::Downloading,
        5..=11 => CacheStatus::Error,
        _ => CacheStatus::Unknown,
    }
}

/// Depth-first flattening with sequential ids starting at 1
fn flatten_tree(nodes: &[FileNode], base: &str, files: &mut Vec<MediaFileEntry>, links: &mut Vec<String>) {
    for node in nodes {
        let path = if base.is_empty() {
            node.n.clone()
        } else {
            format!("{base}/{}", node.n)
        };
        if !node.e.is_empty() {
            flatten_tree(&node.e, &path, files, links);
        } else if !node.l.is_empty() {
            let mut entry = MediaFileEntry::new(files.len() as u32 + 1, path, node.s);
            entry.selected = true;
            files.push(entry);
            links.push(node.l.clone());
        }
    }
}

/// AllDebrid provider
pub struct AllDebridProvider {
    name: String,
    api_key: String,
    base_url: String,
    status_base_url: String,
    http: ProviderClient,
}

impl AllDebridProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let status_base_url = match base_url.strip_suffix("/v4") {
            Some(root) => format!("{root}/v4.1"),
            None => base_url.clone(),
        };

        Ok(Self {
            name: settings.name.clone(),
            api_key: settings.api_key.trim().to_string(),
            base_url,
            status_base_url,
            http: ProviderClient::new(
                &settings.name,
                RateLimitConfig::for_alldebrid(),
                settings.request_timeout,
            )?,
        })
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response, action: &str) -> Result<T> {
        let envelope: Envelope<T> = self.http.read_json(response).await?;
        envelope.into_data(&self.name, action)
    }

    fn first_uploaded(&self, data: UploadData, action: &str) -> Result<AddedRelease> {
        let magnet = data
            .magnets
            .into_iter()
            .next()
            .ok_or_else(|| DebridError::decode(&self.name, format!("{action}: no magnet returned")))?;
        if let Some(error) = magnet.error {
            return Err(DebridError::provider(
                &self.name,
                format!("{action} failed: {}", error.message),
            ));
        }
        let id = magnet
            .id
            .ok_or_else(|| DebridError::decode(&self.name, format!("{action}: missing id")))?;
        info!(
            provider = %self.name,
            release_id = id,
            info_hash = %magnet.hash,
            name = %magnet.name,
            ready = magnet.ready,
            "Magnet added"
        );
        Ok(AddedRelease { id: id.to_string() })
    }

    /// Whether AllDebrid already holds the content for a hash.
    ///
    /// A failed lookup is reported as not available.
    pub async fn check_instant_availability(&self, info_hash: &str) -> Result<bool> {
        let hash = info_hash.trim().to_ascii_lowercase();
        if hash.is_empty() {
            return Err(DebridError::InvalidCandidate("info hash is required".to_string()));
        }
        let url = format!("{}/magnet/instant", self.base_url);
        let response = self
            .http
            .send_with_retry("alldebrid.instant", || {
                self.http
                    .inner()
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("agent", AGENT), ("magnets[]", hash.as_str())])
            })
            .await?;
        let envelope: Envelope<InstantData> = self.http.read_json(response).await?;
        let Ok(data) = envelope.into_data(&self.name, "instant availability") else {
            return Ok(false);
        };
        Ok(data
            .magnets
            .iter()
            .any(|m| m.instant && m.hash.eq_ignore_ascii_case(&hash)))
    }
}

#[async_trait]
impl Provider for AllDebridProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::AllDebrid
    }

    async fn add_magnet(&self, magnet: &str) -> Result<AddedRelease> {
        let magnet = magnet.trim();
        let response = self
            .http
            .send(
                self.http
                    .inner()
                    .post(format!("{}/magnet/upload", self.base_url))
                    .bearer_auth(&self.api_key)
                    .form(&[("agent", AGENT), ("magnets[]", magnet)]),
            )
            .await?;
        let data: UploadData = self.decode(response, "add magnet").await?;
        self.first_uploaded(data, "add magnet")
    }

    async fn add_torrent_file(&self, bytes: Vec<u8>, filename: &str) -> Result<AddedRelease> {
        if bytes.is_empty() {
            return Err(DebridError::InvalidCandidate("torrent data is empty".to_string()));
        }
        let filename = if filename.is_empty() { "upload.torrent" } else { filename };
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/x-bittorrent")
            .map_err(|e| DebridError::transport(&self.name, e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("agent", AGENT)
            .part("files[]", part);

        let response = self
            .http
            .send(
                self.http
                    .inner()
                    .post(format!("{}/magnet/upload/file", self.base_url))
                    .bearer_auth(&self.api_key)
                    .multipart(form),
            )
            .await?;
        let data: UploadData = self.decode(response, "add torrent").await?;
        self.first_uploaded(data, "add torrent")
    }

    async fn release_info(&self, release_id: &str) -> Result<ReleaseInfo> {
        let url = format!("{}/magnet/status", self.status_base_url);
        let response = self
            .http
            .send_with_retry("alldebrid.status", || {
                self.http
                    .inner()
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("agent", AGENT), ("id", release_id.trim())])
            })
            .await?;
        let data: StatusData = self.decode(response, "get release info").await?;

        let status = match data.magnets {
            MagnetsField::One(status) => *status,
            MagnetsField::Many(list) => list.into_iter().next().ok_or_else(|| {
                DebridError::provider(&self.name, format!("release {release_id} not found"))
            })?,
        };

        let mut info = ReleaseInfo {
            id: status.id.to_string(),
            filename: status.filename,
            info_hash: status.hash.to_ascii_lowercase(),
            total_bytes: status.size,
            status: Some(map_status_code(status.status_code)),
            raw_status: status.status,
            ..Default::default()
        };

        if !status.files.is_empty() {
            flatten_tree(&status.files, "", &mut info.files, &mut info.links);
        } else {
            for (idx, link) in status.links.into_iter().enumerate() {
                let mut entry = MediaFileEntry::new(idx as u32 + 1, link.filename, link.size);
                entry.selected = true;
                info.files.push(entry);
                info.links.push(link.link);
            }
        }

        debug!(
            provider = %self.name,
            release_id = %info.id,
            status = %info.status(),
            files = info.files.len(),
            "Release info"
        );
        Ok(info)
    }

    async fn select_files(&self, release_id: &str, _file_ids: &str) -> Result<()> {
        debug!(provider = %self.name, release_id = %release_id, "File selection is automatic");
        Ok(())
    }

    async fn resolve_link(&self, link: &str) -> Result<DirectLink> {
        let response = self
            .http
            .send_with_retry("alldebrid.unlock", || {
                self.http
                    .inner()
                    .post(format!("{}/link/unlock", self.base_url))
                    .bearer_auth(&self.api_key)
                    .form(&[("agent", AGENT), ("link", link.trim())])
            })
            .await?;
        let data: UnlockData = self.decode(response, "unlock link").await?;

        if data.delayed > 0 {
            return Err(DebridError::Delayed {
                provider: self.name.clone(),
                seconds: data.delayed,
            });
        }
        if data.link.is_empty() {
            return Err(DebridError::decode(&self.name, "unlock link: empty link"));
        }
        Ok(DirectLink {
            url: data.link,
            filename: data.filename,
            filesize: data.filesize,
        })
    }

    async fn delete_release(&self, release_id: &str) -> Result<()> {
        let response = self
            .http
            .send_with_retry("alldebrid.delete", || {
                self.http
                    .inner()
                    .post(format!("{}/magnet/delete", self.base_url))
                    .bearer_auth(&self.api_key)
                    .form(&[("agent", AGENT), ("id", release_id.trim())])
            })
            .await?;
        let _: serde_json::Value = self.decode(response, "delete release").await?;
        info!(provider = %self.name, release_id = %release_id, "Release deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_codes() {
        assert_eq!(map_status_code(4), CacheStatus::Cached);
        assert_eq!(map_status_code(0), CacheStatus::Queued);
        assert_eq!(map_status_code(2), CacheStatus::Downloading);
        assert_eq!(map_status_code(7), CacheStatus::Error);
        assert_eq!(map_status_code(42), CacheStatus::Unknown);
    }

    #[test]
    fn test_flatten_nested_tree() {
        let json = r#"[
            {"n": "Show.S01", "e": [
                {"n": "Show.S01E01.mkv", "s": 100, "l": "https://alldebrid.com/f/1"},
                {"n": "Subs", "e": [{"n": "en.srt", "s": 1, "l": "https://alldebrid.com/f/2"}]}
            ]},
            {"n": "README.txt", "s": 5, "l": "https://alldebrid.com/f/3"}
        ]"#;
        let nodes: Vec<FileNode> = serde_json::from_str(json).unwrap();
        let mut files = Vec::new();
        let mut links = Vec::new();
        flatten_tree(&nodes, "", &mut files, &mut links);

        let paths: Vec<_> = files.iter().map(|f| (f.id, f.path.as_str())).collect();
        assert_eq!(
            paths,
            vec![
                (1, "Show.S01/Show.S01E01.mkv"),
                (2, "Show.S01/Subs/en.srt"),
                (3, "README.txt"),
            ]
        );
        assert_eq!(links.len(), 3);
        assert!(files.iter().all(|f| f.selected));
    }

    #[test]
    fn test_magnets_object_or_array() {
        let one: StatusData =
            serde_json::from_str(r#"{"magnets": {"id": 1, "statusCode": 4}}"#).unwrap();
        assert!(matches!(one.magnets, MagnetsField::One(_)));
        let many: StatusData =
            serde_json::from_str(r#"{"magnets": [{"id": 1, "statusCode": 4}]}"#).unwrap();
        assert!(matches!(many.magnets, MagnetsField::Many(ref v) if v.len() == 1));
    }

    #[test]
    fn test_error_envelope() {
        let envelope: Envelope<UploadData> = serde_json::from_str(
            r#"{"status": "error", "error": {"code": "MAGNET_INVALID_URI", "message": "Invalid magnet"}}"#,
        )
        .unwrap();
        let err = envelope.into_data("alldebrid", "add magnet").unwrap_err();
        assert_eq!(
            err.to_string(),
            "alldebrid: add magnet failed: Invalid magnet (MAGNET_INVALID_URI)"
        );
    }
}
