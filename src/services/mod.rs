//! Verification, selection and resolution services

pub mod cache_verifier;
pub mod ffprobe;
pub mod file_selector;
pub mod filename_parser;
pub mod logging;
pub mod multi_provider;
pub mod playback;
pub mod provider_client;
pub mod torrent_metadata;
pub mod track_cache;

pub use cache_verifier::{CacheVerifier, Verification, VerifyOptions};
pub use ffprobe::{FfprobeService, MediaProber, TrackProbeResult};
pub use file_selector::{MediaFileSelection, SelectionHints, SelectionOutcome, select_media_files};
pub use multi_provider::{CoordinatedVerification, MultiProviderCoordinator};
pub use playback::PlaybackResolver;
pub use torrent_metadata::{TorrentFetcher, TorrentMetadata, parse_torrent};
pub use track_cache::{TrackLookup, TrackProbeCache};
