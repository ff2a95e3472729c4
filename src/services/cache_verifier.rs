//! Cache verification
//!
//! Providers have no reliable "is this cached?" endpoint, so a release is
//! verified by adding it, selecting its media files and reading the status
//! back:
//!
//! ```text
//! add -> list -> select -> list -> delete
//! ```
//!
//! Whatever happens after a successful add, the release is deleted exactly
//! once before [`CacheVerifier::verify`] returns. The only exception is a
//! cached result verified with [`VerifyOptions::retain_on_cached`], where
//! the caller takes ownership of the release.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::debrid::Provider;
use crate::debrid::types::{
    AddedRelease, CacheStatus, CacheVerificationResult, ReleaseCandidate, ReleaseInfo, attrs,
};
use crate::error::{DebridError, Result};
use crate::services::ffprobe::{FfprobeService, MediaProber};
use crate::services::file_selector::{
    MediaFileSelection, SelectionHints, SelectionOutcome, select_media_files,
};
use crate::services::torrent_metadata::TorrentFetcher;
use crate::services::track_cache::{TrackLookup, TrackProbeCache};

/// Responses smaller than this are treated as placeholder videos
pub const PLACEHOLDER_SIZE_THRESHOLD: u64 = 1024 * 1024;

const HEAD_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; librarian/1.0)";

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Keep the release on the account when it turns out to be cached
    pub retain_on_cached: bool,
    /// Consult the track probe cache for cached releases
    pub want_tracks: bool,
    /// Checked between protocol steps
    pub cancel: Option<CancellationToken>,
}

impl VerifyOptions {
    pub fn retaining() -> Self {
        Self {
            retain_on_cached: true,
            ..Default::default()
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn ensure_active(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(DebridError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Outcome of a completed verification against one provider
#[derive(Debug, Clone)]
pub struct Verification {
    pub provider: String,
    pub release_id: String,
    pub info_hash: String,
    pub status: CacheStatus,
    /// Release state after file selection
    pub info: ReleaseInfo,
    pub selection: MediaFileSelection,
    /// The release is still on the provider account
    pub retained: bool,
    pub tracks: Option<TrackLookup>,
}

impl Verification {
    pub fn is_cached(&self) -> bool {
        self.status.is_cached()
    }

    /// Index into `info.links` for the preferred file.
    ///
    /// Links follow the selected files in id order, so the position of the
    /// preferred file among selected files picks its link.
    pub fn preferred_link_index(&self) -> usize {
        self.info
            .files
            .iter()
            .filter(|f| f.selected)
            .position(|f| f.id == self.selection.preferred_id)
            .filter(|idx| *idx < self.info.links.len())
            .unwrap_or(0)
    }

    pub fn preferred_link(&self) -> Option<&str> {
        self.info
            .links
            .get(self.preferred_link_index())
            .map(String::as_str)
    }

    pub fn to_result(&self) -> CacheVerificationResult {
        let status = match self.status {
            CacheStatus::Cached => CacheStatus::Cached,
            CacheStatus::Error => CacheStatus::Error,
            _ => CacheStatus::NotCached,
        };
        let mut result = CacheVerificationResult::new(&self.provider, &self.info_hash, status);
        match &self.tracks {
            Some(TrackLookup::Ready(entry)) => {
                result.audio_tracks = entry.audio_tracks.clone();
                result.subtitle_tracks = entry.subtitle_tracks.clone();
                result.track_probe_error = entry.probe_error.clone();
            }
            Some(TrackLookup::Loading) => result.tracks_loading = true,
            Some(TrackLookup::Failed(message)) => {
                result.track_probe_error = Some(message.clone());
            }
            None => {}
        }
        result
    }
}

/// Map a verification error onto a health result
pub fn failure_result(provider: &str, info_hash: &str, err: &DebridError) -> CacheVerificationResult {
    let status = if err.is_not_cached() {
        CacheStatus::NotCached
    } else {
        CacheStatus::Error
    };
    CacheVerificationResult::failed(provider, info_hash, status, err.to_string())
}

/// Why a HEAD response marks a pre-resolved stream as unavailable, if it does
pub fn classify_head(status: u16, content_length: Option<u64>) -> Option<String> {
    match status {
        404 => Some("stream returned 404 (not found)".to_string()),
        // HEAD not supported; the body length would be the error page's
        405 => None,
        s if s >= 400 => Some(format!("stream returned HTTP {s}")),
        _ => content_length
            .filter(|len| *len > 0 && *len < PLACEHOLDER_SIZE_THRESHOLD)
            .map(|len| format!("stream too small ({len} bytes) - likely a placeholder")),
    }
}

/// Drives the add/list/select/list/delete protocol against one provider
pub struct CacheVerifier {
    fetcher: TorrentFetcher,
    http: reqwest::Client,
    prober: Option<Arc<dyn MediaProber>>,
    track_cache: Option<TrackProbeCache>,
}

impl CacheVerifier {
    pub fn new(fetcher: TorrentFetcher) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HEAD_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DebridError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            fetcher,
            http,
            prober: None,
            track_cache: None,
        })
    }

    /// Verifier with ffprobe and the track cache wired from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let verifier = Self::new(TorrentFetcher::new(config.torrent_download_timeout)?)?;
        Ok(match &config.ffprobe_path {
            Some(path) => {
                let prober: Arc<dyn MediaProber> = Arc::new(FfprobeService::new(path.clone()));
                let cache = TrackProbeCache::new(Arc::clone(&prober))
                    .with_probe_timeout(config.track_probe_timeout);
                verifier.with_prober(prober).with_track_cache(cache)
            }
            None => verifier,
        })
    }

    pub fn with_prober(mut self, prober: Arc<dyn MediaProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn with_track_cache(mut self, cache: TrackProbeCache) -> Self {
        self.track_cache = Some(cache);
        self
    }

    pub fn track_cache(&self) -> Option<&TrackProbeCache> {
        self.track_cache.as_ref()
    }

    /// Verify a candidate against one provider.
    ///
    /// Returns `Ok` for any completed verification, cached or not; check
    /// [`Verification::is_cached`]. The release is deleted before returning
    /// unless it is cached and `opts.retain_on_cached` is set.
    pub async fn verify(
        &self,
        provider: &dyn Provider,
        candidate: &ReleaseCandidate,
        opts: &VerifyOptions,
    ) -> Result<Verification> {
        opts.ensure_active()?;
        let added = self.add(provider, candidate).await?;
        info!(
            provider = %provider.name(),
            release_id = %added.id,
            title = %candidate.title,
            "Release added for verification"
        );

        match self.drive(provider, candidate, &added.id, opts).await {
            Ok(mut verification) if verification.is_cached() && opts.retain_on_cached => {
                verification.retained = true;
                info!(
                    provider = %provider.name(),
                    release_id = %added.id,
                    "Cached release retained"
                );
                Ok(verification)
            }
            outcome => {
                if let Err(e) = &outcome {
                    info!(
                        provider = %provider.name(),
                        release_id = %added.id,
                        error = %e,
                        "Verification failed"
                    );
                }
                self.discard(provider, &added.id).await;
                outcome
            }
        }
    }

    /// Verify and map the outcome onto a health result. Never retains.
    pub async fn check_health(
        &self,
        provider: &dyn Provider,
        candidate: &ReleaseCandidate,
        want_tracks: bool,
    ) -> CacheVerificationResult {
        if candidate.is_preresolved() {
            return self.check_preresolved(candidate, want_tracks).await;
        }
        let info_hash = candidate.info_hash().unwrap_or_default();
        let opts = VerifyOptions {
            want_tracks,
            ..Default::default()
        };
        match self.verify(provider, candidate, &opts).await {
            Ok(verification) => verification.to_result(),
            Err(e) => failure_result(provider.name(), &info_hash, &e),
        }
    }

    /// Best-effort delete; failures are logged and swallowed
    pub async fn discard(&self, provider: &dyn Provider, release_id: &str) {
        match provider.delete_release(release_id).await {
            Ok(()) => debug!(provider = %provider.name(), release_id = %release_id, "Release removed"),
            Err(e) => warn!(
                provider = %provider.name(),
                release_id = %release_id,
                error = %e,
                "Failed to remove release"
            ),
        }
    }

    async fn add(&self, provider: &dyn Provider, candidate: &ReleaseCandidate) -> Result<AddedRelease> {
        if candidate.is_magnet() {
            return provider.add_magnet(candidate.link.trim()).await;
        }
        if let Some(url) = candidate.torrent_url() {
            let torrent = self.fetcher.fetch(url).await?;
            return provider
                .add_torrent_file(torrent.bytes, &torrent.filename)
                .await;
        }
        match candidate.magnet_uri() {
            Some(magnet) => provider.add_magnet(&magnet).await,
            None => Err(DebridError::InvalidCandidate(
                "missing info hash and no torrent URL available".to_string(),
            )),
        }
    }

    async fn drive(
        &self,
        provider: &dyn Provider,
        candidate: &ReleaseCandidate,
        release_id: &str,
        opts: &VerifyOptions,
    ) -> Result<Verification> {
        opts.ensure_active()?;
        let listed = provider.release_info(release_id).await?;

        opts.ensure_active()?;
        let hints = SelectionHints::from_candidate(candidate, &listed.filename);
        let selection = match select_media_files(&listed.files, &hints) {
            SelectionOutcome::NoMedia => {
                return Err(DebridError::Rejection(
                    "no media files found in release".to_string(),
                ));
            }
            SelectionOutcome::Rejected(reason) => return Err(DebridError::Rejection(reason)),
            SelectionOutcome::Selected(selection) => selection,
        };
        info!(
            provider = %provider.name(),
            release_id = %release_id,
            preferred = %selection.preferred_label,
            reason = %selection.reason,
            files = selection.ordered_ids.len(),
            "Selected media files"
        );

        provider
            .select_files(release_id, &selection.id_list())
            .await?;

        opts.ensure_active()?;
        let info = provider.release_info(release_id).await?;
        let status = info.status();
        info!(
            provider = %provider.name(),
            release_id = %release_id,
            status = %status,
            raw_status = %info.raw_status,
            "Verification status"
        );

        let info_hash = candidate
            .info_hash()
            .or_else(|| (!info.info_hash.is_empty()).then(|| info.info_hash.to_ascii_lowercase()))
            .unwrap_or_default();

        let mut verification = Verification {
            provider: provider.name().to_string(),
            release_id: release_id.to_string(),
            info_hash,
            status,
            info,
            selection,
            retained: false,
            tracks: None,
        };

        if let Some(cache) = &self.track_cache {
            if status.is_cached() && opts.want_tracks && !verification.info_hash.is_empty() {
                if let Some(link) = verification.preferred_link().map(str::to_string) {
                    let lookup = cache
                        .request(&verification.info_hash, || async move {
                            provider.resolve_link(&link).await.map(|direct| direct.url)
                        })
                        .await;
                    verification.tracks = Some(lookup);
                }
            }
        }

        Ok(verification)
    }

    /// Health check for a candidate that already carries a stream URL.
    ///
    /// Upstream aggregators over-report availability, so the URL is
    /// checked with a HEAD request and, when ffprobe is available, for the
    /// presence of audio streams.
    pub async fn check_preresolved(
        &self,
        candidate: &ReleaseCandidate,
        want_tracks: bool,
    ) -> CacheVerificationResult {
        let provider = candidate.attribute(attrs::TRACKER).unwrap_or_default();
        let info_hash = candidate.info_hash().unwrap_or_default();
        let not_cached = |message: String| {
            CacheVerificationResult::failed(provider, &info_hash, CacheStatus::NotCached, message)
        };

        let Some(stream_url) = candidate.stream_url() else {
            return CacheVerificationResult::failed(
                provider,
                &info_hash,
                CacheStatus::Error,
                "pre-resolved candidate has no stream URL".to_string(),
            );
        };

        match self.http.head(stream_url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // reqwest reports a zero body length for HEAD, read the header
                let content_length = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                debug!(
                    title = %candidate.title,
                    status,
                    content_length = ?content_length,
                    "Pre-resolved stream HEAD"
                );
                if let Some(reason) = classify_head(status, content_length) {
                    info!(title = %candidate.title, reason = %reason, "Pre-resolved stream unavailable");
                    return not_cached(reason);
                }
            }
            Err(e) => {
                warn!(title = %candidate.title, error = %e, "HEAD request failed for pre-resolved stream");
            }
        }

        let mut result = CacheVerificationResult::new(provider, &info_hash, CacheStatus::Cached);
        let Some(prober) = &self.prober else {
            return result;
        };

        match prober.count_audio_streams(stream_url).await {
            Ok(0) => {
                return not_cached("stream appears to be a placeholder (no audio streams)".to_string());
            }
            Ok(count) => debug!(title = %candidate.title, audio_streams = count, "Pre-resolved stream verified"),
            Err(e) => return not_cached(e.to_string()),
        }

        if want_tracks {
            match prober.probe_tracks(stream_url).await {
                Ok(tracks) => {
                    result.audio_tracks = tracks.audio_tracks;
                    result.subtitle_tracks = tracks.subtitle_tracks;
                }
                Err(e) => result.track_probe_error = Some(e.to_string()),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::types::MediaFileEntry;
    use crate::services::ffprobe::TrackProbeResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::services::torrent_metadata::DEFAULT_DOWNLOAD_TIMEOUT;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier() -> CacheVerifier {
        CacheVerifier::new(TorrentFetcher::new(DEFAULT_DOWNLOAD_TIMEOUT).unwrap()).unwrap()
    }

    fn verification(files: Vec<MediaFileEntry>, links: usize, preferred: u32) -> Verification {
        Verification {
            provider: "rd".into(),
            release_id: "R1".into(),
            info_hash: "abc".into(),
            status: CacheStatus::Cached,
            info: ReleaseInfo {
                files,
                links: (0..links).map(|i| format!("https://rd/d/{i}")).collect(),
                ..Default::default()
            },
            selection: MediaFileSelection {
                ordered_ids: vec![preferred],
                preferred_id: preferred,
                preferred_label: String::new(),
                reason: String::new(),
            },
            retained: false,
            tracks: None,
        }
    }

    fn file(id: u32, selected: bool) -> MediaFileEntry {
        MediaFileEntry {
            selected,
            ..MediaFileEntry::new(id, format!("f{id}.mkv"), 1)
        }
    }

    #[test]
    fn test_preferred_link_follows_selected_files() {
        let v = verification(vec![file(1, true), file(2, false), file(3, true)], 2, 3);
        assert_eq!(v.preferred_link_index(), 1);
        assert_eq!(v.preferred_link(), Some("https://rd/d/1"));
    }

    #[test]
    fn test_preferred_link_out_of_range_falls_back() {
        let v = verification(vec![file(1, true), file(2, true), file(3, true)], 1, 3);
        assert_eq!(v.preferred_link_index(), 0);
        let v = verification(vec![file(1, true)], 0, 1);
        assert_eq!(v.preferred_link(), None);
    }

    #[test]
    fn test_tracks_in_result() {
        let mut v = verification(vec![file(1, true)], 1, 1);
        v.tracks = Some(TrackLookup::Loading);
        let result = v.to_result();
        assert!(result.healthy);
        assert!(result.tracks_loading);

        v.status = CacheStatus::Downloading;
        v.tracks = None;
        let result = v.to_result();
        assert!(!result.healthy);
        assert_eq!(result.status, CacheStatus::NotCached);
    }

    #[test]
    fn test_failure_result_status() {
        let result = failure_result(
            "rd",
            "abc",
            &DebridError::Rejection("target episode S02E05 not found in torrent".into()),
        );
        assert_eq!(result.status, CacheStatus::Error);
        assert_eq!(
            result.error_message.as_deref(),
            Some("target episode S02E05 not found in torrent")
        );
        let result = failure_result(
            "rd",
            "abc",
            &DebridError::NotCached {
                status: "downloading".into(),
            },
        );
        assert_eq!(result.status, CacheStatus::NotCached);
    }

    #[test]
    fn test_classify_head() {
        assert_eq!(
            classify_head(404, None).as_deref(),
            Some("stream returned 404 (not found)")
        );
        assert_eq!(classify_head(405, Some(10)), None);
        assert_eq!(classify_head(503, None).as_deref(), Some("stream returned HTTP 503"));
        assert_eq!(
            classify_head(200, Some(512)).as_deref(),
            Some("stream too small (512 bytes) - likely a placeholder")
        );
        assert_eq!(classify_head(200, Some(0)), None);
        assert_eq!(classify_head(206, Some(5 * 1024 * 1024)), None);
        assert_eq!(classify_head(200, None), None);
    }

    #[test]
    fn test_cancelled_options() {
        let token = CancellationToken::new();
        let opts = VerifyOptions::default().with_cancel(token.clone());
        assert!(opts.ensure_active().is_ok());
        token.cancel();
        assert!(matches!(opts.ensure_active(), Err(DebridError::Cancelled)));
    }

    fn preresolved(url: &str) -> ReleaseCandidate {
        ReleaseCandidate::new("Movie.2024.2160p", "")
            .with_attribute(attrs::PRERESOLVED, "true")
            .with_attribute(attrs::STREAM_URL, url)
            .with_attribute(attrs::TRACKER, "aiostreams")
    }

    #[tokio::test]
    async fn test_preresolved_404() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = verifier()
            .check_preresolved(&preresolved(&format!("{}/movie.mkv", server.uri())), false)
            .await;
        assert!(!result.healthy);
        assert_eq!(result.status, CacheStatus::NotCached);
        assert_eq!(result.provider, "aiostreams");
        assert_eq!(
            result.error_message.as_deref(),
            Some("stream returned 404 (not found)")
        );
    }

    #[tokio::test]
    async fn test_preresolved_placeholder_size() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]),
            )
            .mount(&server)
            .await;

        let result = verifier()
            .check_preresolved(&preresolved(&format!("{}/movie.mkv", server.uri())), false)
            .await;
        assert_eq!(result.status, CacheStatus::NotCached);
        assert!(result.error_message.unwrap().contains("likely a placeholder"));
    }

    struct FixedProber {
        audio_streams: usize,
        track_probes: AtomicUsize,
    }

    #[async_trait]
    impl MediaProber for FixedProber {
        async fn count_audio_streams(&self, _url: &str) -> Result<usize> {
            Ok(self.audio_streams)
        }

        async fn probe_tracks(&self, _url: &str) -> Result<TrackProbeResult> {
            self.track_probes.fetch_add(1, Ordering::SeqCst);
            Ok(Default::default())
        }
    }

    fn fixed_prober(audio_streams: usize) -> Arc<FixedProber> {
        Arc::new(FixedProber {
            audio_streams,
            track_probes: Default::default(),
        })
    }

    async fn healthy_head() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_preresolved_without_audio_is_placeholder() {
        let server = healthy_head().await;
        let prober = fixed_prober(0);

        let result = verifier()
            .with_prober(prober.clone())
            .check_preresolved(&preresolved(&format!("{}/movie.mkv", server.uri())), false)
            .await;
        assert!(!result.healthy);
        assert_eq!(result.status, CacheStatus::NotCached);
        assert_eq!(
            result.error_message.as_deref(),
            Some("stream appears to be a placeholder (no audio streams)")
        );
        assert_eq!(prober.track_probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preresolved_with_audio_probes_tracks_on_request() {
        let server = healthy_head().await;
        let prober = fixed_prober(2);
        let verifier = verifier().with_prober(prober.clone());
        let candidate = preresolved(&format!("{}/movie.mkv", server.uri()));

        assert!(verifier.check_preresolved(&candidate, false).await.healthy);
        assert_eq!(prober.track_probes.load(Ordering::SeqCst), 0);

        let result = verifier.check_preresolved(&candidate, true).await;
        assert!(result.healthy);
        assert_eq!(result.track_probe_error, None);
        assert_eq!(prober.track_probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preresolved_head_not_allowed_is_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let result = verifier()
            .check_preresolved(&preresolved(&format!("{}/movie.mkv", server.uri())), false)
            .await;
        assert!(result.healthy);
        assert_eq!(result.status, CacheStatus::Cached);
    }
}
