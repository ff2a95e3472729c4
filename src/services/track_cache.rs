//! Track probe cache
//!
//! Single-flight, TTL cache of audio/subtitle track listings keyed by info
//! hash. Probing a remote stream is slow, so the first caller starts a
//! background probe and everyone asking in the meantime gets
//! [`TrackLookup::Loading`].
//!
//! The entry map and the in-flight set have their own locks and are never
//! held at the same time.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::debrid::types::{AudioTrack, SubtitleTrack};
use crate::error::{DebridError, Result};
use crate::services::ffprobe::{MediaProber, TrackProbeResult};

/// How long a probe result stays valid
pub const TRACK_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Default bound on one background probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// A cached probe outcome. Failed probes are cached too, with `probe_error` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCacheEntry {
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub probe_error: Option<String>,
    pub expires_at: Instant,
}

impl TrackCacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Result of asking the cache for tracks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackLookup {
    Ready(TrackCacheEntry),
    /// A probe is running; ask again later
    Loading,
    /// No probe could be started (the stream URL could not be resolved)
    Failed(String),
}

/// Clears the in-flight marker for a hash when dropped
pub struct ProbeGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    info_hash: String,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.info_hash);
    }
}

#[derive(Clone)]
pub struct TrackProbeCache {
    prober: Arc<dyn MediaProber>,
    entries: Arc<RwLock<HashMap<String, TrackCacheEntry>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    ttl: Duration,
    probe_timeout: Duration,
    clock: Clock,
    shutdown: CancellationToken,
}

impl TrackProbeCache {
    pub fn new(prober: Arc<dyn MediaProber>) -> Self {
        Self {
            prober,
            entries: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            ttl: TRACK_CACHE_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            clock: Arc::new(Instant::now),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Replace the time source used for expiry
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Valid entry for a hash, if any
    pub fn lookup(&self, info_hash: &str) -> Option<TrackCacheEntry> {
        let now = (self.clock)();
        self.entries
            .read()
            .get(info_hash)
            .filter(|entry| entry.is_valid(now))
            .cloned()
    }

    /// Mark a hash as being probed. `None` when a probe is already running.
    pub fn begin_probe(&self, info_hash: &str) -> Option<ProbeGuard> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(info_hash.to_string()) {
            return None;
        }
        Some(ProbeGuard {
            in_flight: Arc::clone(&self.in_flight),
            info_hash: info_hash.to_string(),
        })
    }

    pub fn is_probing(&self, info_hash: &str) -> bool {
        self.in_flight.lock().contains(info_hash)
    }

    /// Store a probe outcome with a fresh expiry
    pub fn complete_probe(&self, info_hash: &str, outcome: Result<TrackProbeResult>) -> TrackCacheEntry {
        let expires_at = (self.clock)() + self.ttl;
        let entry = match outcome {
            Ok(tracks) => TrackCacheEntry {
                audio_tracks: tracks.audio_tracks,
                subtitle_tracks: tracks.subtitle_tracks,
                probe_error: None,
                expires_at,
            },
            Err(e) => TrackCacheEntry {
                audio_tracks: Vec::new(),
                subtitle_tracks: Vec::new(),
                probe_error: Some(e.to_string()),
                expires_at,
            },
        };
        self.entries
            .write()
            .insert(info_hash.to_string(), entry.clone());
        entry
    }

    /// Cached tracks for a hash, starting a background probe when needed.
    ///
    /// `resolve_url` produces a temporary direct URL for the stream; it is
    /// only awaited when this call becomes the one probing the hash. The
    /// probe itself runs detached from the caller and survives it.
    pub async fn request<F, Fut>(&self, info_hash: &str, resolve_url: F) -> TrackLookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(entry) = self.lookup(info_hash) {
            debug!(
                info_hash = %info_hash,
                audio = entry.audio_tracks.len(),
                subtitles = entry.subtitle_tracks.len(),
                "Track cache hit"
            );
            return TrackLookup::Ready(entry);
        }

        let Some(guard) = self.begin_probe(info_hash) else {
            debug!(info_hash = %info_hash, "Track probe already in progress");
            return TrackLookup::Loading;
        };

        let url = match resolve_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!(info_hash = %info_hash, error = %e, "Failed to resolve stream URL for track probe");
                return TrackLookup::Failed(format!("unrestrict failed: {e}"));
            }
        };

        self.spawn_probe(info_hash.to_string(), url, guard);
        TrackLookup::Loading
    }

    fn spawn_probe(&self, info_hash: String, url: String, guard: ProbeGuard) {
        let cache = self.clone();
        let token = self.shutdown.child_token();

        tokio::spawn(async move {
            let probe = tokio::time::timeout(cache.probe_timeout, cache.prober.probe_tracks(&url));
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    debug!(info_hash = %info_hash, "Track probe cancelled");
                    return;
                }
                outcome = probe => outcome,
            };

            let outcome = match outcome {
                Ok(result) => result,
                Err(_) => Err(DebridError::Probe(format!(
                    "track probe timed out after {}s",
                    cache.probe_timeout.as_secs()
                ))),
            };
            match &outcome {
                Ok(tracks) => info!(
                    info_hash = %info_hash,
                    audio = tracks.audio_tracks.len(),
                    subtitles = tracks.subtitle_tracks.len(),
                    "Track probe complete"
                ),
                Err(e) => warn!(info_hash = %info_hash, error = %e, "Track probe failed"),
            }

            cache.complete_probe(&info_hash, outcome);
            drop(guard);
        });
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        let now = (self.clock)();
        self.entries.write().retain(|_, entry| entry.is_valid(now));
    }

    /// Cancel every running background probe
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
