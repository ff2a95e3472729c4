//! Debrid cache verification and playback resolution.
//!
//! A release candidate found by a scraper is checked against one or more
//! debrid providers by adding it, selecting the right media file and
//! reading back the cache status. Cached releases resolve to a playable
//! reference; everything else is removed from the provider account again.

pub mod config;
pub mod debrid;
pub mod error;
pub mod services;

pub use config::{Config, MultiProviderMode};
pub use debrid::registry::ProviderRegistry;
pub use debrid::types::{CacheStatus, CacheVerificationResult, PlaybackResolution, ReleaseCandidate};
pub use debrid::{Provider, ProviderKind};
pub use error::{DebridError, Result};
