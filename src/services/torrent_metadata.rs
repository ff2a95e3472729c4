//! Torrent file download and parsing
//!
//! Some candidates only carry a `.torrent` URL (private trackers behind an
//! indexer proxy). The file is fetched, validated as bencode and uploaded
//! to the provider as-is.

use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use serde::Deserialize;
use serde_bencode::value::Value;
use tracing::{debug, info};

use crate::error::{DebridError, Result};

/// Largest `.torrent` file accepted
pub const MAX_TORRENT_SIZE: usize = 10 * 1024 * 1024;

/// Indexer proxies add a hop, so this is longer than provider timeouts
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

const SOURCE: &str = "tracker";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; librarian/1.0)";

/// Information about a file within a torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileInfo {
    /// `/`-joined path within the torrent
    pub path: String,
    pub size: u64,
    pub index: usize,
}

/// Parsed `info` dictionary of a torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMetadata {
    pub name: String,
    pub files: Vec<TorrentFileInfo>,
}

impl TorrentMetadata {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Bencoded byte string as text; legacy clients wrote names in local code pages
fn lossy_text(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    }
}

/// Parse a .torrent file without downloading its content
pub fn parse_torrent(torrent_bytes: &[u8]) -> Result<TorrentMetadata> {
    #[derive(Debug, Deserialize)]
    struct TorrentFile {
        length: u64,
        #[serde(default)]
        path: Vec<Value>,
    }

    #[derive(Debug, Deserialize)]
    struct TorrentInfo {
        #[serde(default)]
        name: Option<Value>,
        #[serde(default)]
        length: Option<u64>,
        #[serde(default)]
        files: Option<Vec<TorrentFile>>,
    }

    #[derive(Debug, Deserialize)]
    struct Torrent {
        info: TorrentInfo,
    }

    let torrent: Torrent = serde_bencode::from_bytes(torrent_bytes)
        .map_err(|e| DebridError::decode(SOURCE, format!("invalid torrent file: {e}")))?;

    let name = torrent.info.name.as_ref().map(lossy_text).unwrap_or_default();
    let files = match (torrent.info.files, torrent.info.length) {
        (Some(files), _) => files
            .into_iter()
            .enumerate()
            .map(|(index, file)| TorrentFileInfo {
                path: file.path.iter().map(lossy_text).collect::<Vec<_>>().join("/"),
                size: file.length,
                index,
            })
            .collect(),
        (None, Some(length)) => vec![TorrentFileInfo {
            path: name.clone(),
            size: length,
            index: 0,
        }],
        (None, None) => Vec::new(),
    };

    Ok(TorrentMetadata { name, files })
}

/// A downloaded and validated torrent file
#[derive(Debug, Clone)]
pub struct DownloadedTorrent {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub metadata: TorrentMetadata,
}

/// Filename from a `Content-Disposition` header value
fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // RFC 5987: charset'lang'percent-encoded
                let encoded = raw.trim().rsplit('\'').next().unwrap_or(raw);
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    let decoded = decoded.trim().to_string();
                    if !decoded.is_empty() {
                        return Some(decoded);
                    }
                }
            }
            "filename" => {
                let name = raw.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

/// Last URL path segment with `.torrent` appended
fn filename_from_url(torrent_url: &str) -> Option<String> {
    let parsed = url::Url::parse(torrent_url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;
    let segment = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    if segment.to_ascii_lowercase().ends_with(".torrent") {
        Some(segment)
    } else {
        Some(format!("{segment}.torrent"))
    }
}

/// Pick a filename for an uploaded torrent
pub fn torrent_filename(headers: &HeaderMap, torrent_url: &str, metadata: &TorrentMetadata) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(torrent_url))
        .or_else(|| {
            let name = metadata.name.trim();
            (!name.is_empty()).then(|| format!("{name}.torrent"))
        })
        .unwrap_or_else(|| "download.torrent".to_string())
}

/// Downloads `.torrent` files with a size cap and timeout
pub struct TorrentFetcher {
    client: reqwest::Client,
    max_size: usize,
}

impl TorrentFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DebridError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_size: MAX_TORRENT_SIZE,
        })
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Download and validate a torrent file
    pub async fn fetch(&self, torrent_url: &str) -> Result<DownloadedTorrent> {
        debug!(url = %torrent_url, "Downloading torrent file");

        let mut response = self
            .client
            .get(torrent_url)
            .send()
            .await
            .map_err(|e| DebridError::transport(SOURCE, format!("download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DebridError::transport(
                SOURCE,
                format!("download failed with status {}", response.status().as_u16()),
            ));
        }
        if response
            .content_length()
            .is_some_and(|len| len as usize > self.max_size)
        {
            return Err(DebridError::decode(SOURCE, "torrent file too large"));
        }

        let headers = response.headers().clone();
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DebridError::transport(SOURCE, format!("read response: {e}")))?
        {
            if bytes.len() + chunk.len() > self.max_size {
                return Err(DebridError::decode(SOURCE, "torrent file too large"));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.len() < 10 || bytes[0] != b'd' {
            return Err(DebridError::decode(
                SOURCE,
                "invalid torrent file format (expected bencoded data)",
            ));
        }
        let metadata = parse_torrent(&bytes)?;
        let filename = torrent_filename(&headers, torrent_url, &metadata);

        info!(
            filename = %filename,
            bytes = bytes.len(),
            files = metadata.files.len(),
            "Downloaded torrent file"
        );
        Ok(DownloadedTorrent {
            bytes,
            filename,
            metadata,
        })
    }
}
