//! Scripted in-memory provider shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use librarian_debrid::debrid::types::{
    AddedRelease, AudioTrack, CacheStatus, DirectLink, MediaFileEntry, ReleaseCandidate,
    ReleaseInfo, attrs,
};
use librarian_debrid::debrid::{Provider, ProviderKind};
use librarian_debrid::error::{DebridError, Result};
use librarian_debrid::services::{CacheVerifier, MediaProber, TrackProbeResult};
use librarian_debrid::services::torrent_metadata::TorrentFetcher;

pub const MB: u64 = 1024 * 1024;

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddMagnet(String),
    AddTorrent(String),
    Info(String),
    Select(String, String),
    Resolve(String),
    Delete(String),
}

/// Protocol step a fake can be told to fail at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Add,
    FirstInfo,
    Select,
    SecondInfo,
    Resolve,
    Delete,
}

pub struct FakeProvider {
    name: String,
    files: Vec<MediaFileEntry>,
    status: CacheStatus,
    add_delay: Duration,
    status_delay: Duration,
    fail_at: Option<Step>,
    link_override: Option<String>,
    calls: Mutex<Vec<Call>>,
    selected: Mutex<Vec<u32>>,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: vec![MediaFileEntry::new(1, "Movie.2024.1080p.mkv", 4000 * MB)],
            status: CacheStatus::Cached,
            add_delay: Duration::ZERO,
            status_delay: Duration::ZERO,
            fail_at: None,
            link_override: None,
            calls: Mutex::new(Vec::new()),
            selected: Mutex::new(Vec::new()),
        }
    }

    pub fn with_files(mut self, files: &[(u32, &str, u64)]) -> Self {
        self.files = files
            .iter()
            .map(|(id, path, bytes)| MediaFileEntry::new(*id, *path, *bytes))
            .collect();
        self
    }

    pub fn with_status(mut self, status: CacheStatus) -> Self {
        self.status = status;
        self
    }

    /// Delay before the add call returns
    pub fn with_add_delay(mut self, delay: Duration) -> Self {
        self.add_delay = delay;
        self
    }

    /// Delay before the post-selection status is reported
    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Every link points at this URL
    pub fn with_link(mut self, link: &str) -> Self {
        self.link_override = Some(link.to_string());
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn release_id(&self) -> String {
        format!("{}-1", self.name)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn adds(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::AddMagnet(_) | Call::AddTorrent(_)))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete(_)))
            .count()
    }

    pub fn selected_ids(&self) -> Vec<u32> {
        self.selected.lock().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn fail(&self, step: Step) -> Result<()> {
        if self.fail_at == Some(step) {
            return Err(DebridError::transport(&self.name, format!("{step:?} failed")));
        }
        Ok(())
    }

    /// Files were selected since the most recent add
    fn selection_done(&self) -> bool {
        self.calls()
            .iter()
            .rev()
            .take_while(|c| !matches!(c, Call::AddMagnet(_) | Call::AddTorrent(_)))
            .any(|c| matches!(c, Call::Select(..)))
    }

    async fn added(&self) -> Result<AddedRelease> {
        tokio::time::sleep(self.add_delay).await;
        self.fail(Step::Add)?;
        Ok(AddedRelease {
            id: self.release_id(),
        })
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RealDebrid
    }

    async fn add_magnet(&self, magnet: &str) -> Result<AddedRelease> {
        self.record(Call::AddMagnet(magnet.to_string()));
        self.selected.lock().clear();
        self.added().await
    }

    async fn add_torrent_file(&self, _bytes: Vec<u8>, filename: &str) -> Result<AddedRelease> {
        self.record(Call::AddTorrent(filename.to_string()));
        self.selected.lock().clear();
        self.added().await
    }

    async fn release_info(&self, release_id: &str) -> Result<ReleaseInfo> {
        self.record(Call::Info(release_id.to_string()));
        let after_selection = self.selection_done();
        if after_selection {
            tokio::time::sleep(self.status_delay).await;
            self.fail(Step::SecondInfo)?;
        } else {
            self.fail(Step::FirstInfo)?;
        }

        let selected = self.selected.lock().clone();
        let mut files = self.files.clone();
        for file in &mut files {
            file.selected = selected.contains(&file.id);
        }
        let status = if after_selection {
            self.status
        } else {
            CacheStatus::Queued
        };
        let mut selected_files: Vec<&MediaFileEntry> = files.iter().filter(|f| f.selected).collect();
        selected_files.sort_by_key(|f| f.id);
        let links = if status.is_cached() {
            selected_files
                .iter()
                .map(|f| {
                    self.link_override
                        .clone()
                        .unwrap_or_else(|| format!("https://{}.example/d/{}", self.name, f.id))
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(ReleaseInfo {
            id: release_id.to_string(),
            filename: "Release".to_string(),
            info_hash: "feedface".to_string(),
            total_bytes: self.files.iter().map(|f| f.bytes).sum(),
            status: Some(status),
            raw_status: status.to_string(),
            files,
            links,
        })
    }

    async fn select_files(&self, release_id: &str, file_ids: &str) -> Result<()> {
        self.record(Call::Select(release_id.to_string(), file_ids.to_string()));
        self.fail(Step::Select)?;
        *self.selected.lock() = file_ids
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect();
        Ok(())
    }

    async fn resolve_link(&self, link: &str) -> Result<DirectLink> {
        self.record(Call::Resolve(link.to_string()));
        self.fail(Step::Resolve)?;
        Ok(DirectLink {
            url: format!("{link}?token=direct"),
            filename: String::new(),
            filesize: 0,
        })
    }

    async fn delete_release(&self, release_id: &str) -> Result<()> {
        self.record(Call::Delete(release_id.to_string()));
        self.fail(Step::Delete)
    }
}

/// Prober reporting a fixed audio stream count and one English track
pub struct FakeProber {
    audio_streams: usize,
    probed: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn new(audio_streams: usize) -> Arc<Self> {
        Arc::new(Self {
            audio_streams,
            probed: Mutex::new(Vec::new()),
        })
    }

    /// URLs passed to `probe_tracks`
    pub fn probed_urls(&self) -> Vec<String> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn count_audio_streams(&self, _url: &str) -> Result<usize> {
        Ok(self.audio_streams)
    }

    async fn probe_tracks(&self, url: &str) -> Result<TrackProbeResult> {
        self.probed.lock().push(url.to_string());
        Ok(TrackProbeResult {
            audio_tracks: vec![AudioTrack {
                index: 1,
                language: "eng".to_string(),
                codec: "eac3".to_string(),
                title: "Surround 5.1".to_string(),
            }],
            subtitle_tracks: Vec::new(),
        })
    }
}

pub fn verifier() -> CacheVerifier {
    CacheVerifier::new(TorrentFetcher::new(Duration::from_secs(5)).unwrap()).unwrap()
}

pub fn magnet_candidate(title: &str) -> ReleaseCandidate {
    ReleaseCandidate::new(title, "magnet:?xt=urn:btih:ABCDEF0123456789&dn=release")
}

pub fn episode_candidate(title: &str, season: u32, episode: u32) -> ReleaseCandidate {
    magnet_candidate(title)
        .with_attribute(attrs::TARGET_SEASON, season.to_string())
        .with_attribute(attrs::TARGET_EPISODE, episode.to_string())
}
