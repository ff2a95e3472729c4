//! Debrid providers
//!
//! A provider is a paid service that downloads torrents server-side and hands
//! back direct HTTP links. Every vendor is reached through the [`Provider`]
//! trait; vendor quirks stay inside the adapters under [`definitions`].
//!
//! # Adding a new provider
//!
//! 1. Create a new file in `definitions/` (e.g., `premiumize.rs`)
//! 2. Implement the `Provider` trait for it
//! 3. Add a [`ProviderKind`] variant and an entry in `AVAILABLE_PROVIDERS`
//! 4. Register its constructor in [`registry::ProviderRegistry::with_builtin_constructors`]

pub mod definitions;
pub mod registry;
pub mod scraper;
pub mod types;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::{DebridError, Result};
use types::{AddedRelease, DirectLink, ReleaseInfo};

pub use registry::{AVAILABLE_PROVIDERS, ProviderRegistry, ProviderTypeInfo};

/// Supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    RealDebrid,
    AllDebrid,
    TorBox,
}

impl ProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::RealDebrid => "realdebrid",
            ProviderKind::AllDebrid => "alldebrid",
            ProviderKind::TorBox => "torbox",
        }
    }

    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::RealDebrid,
            ProviderKind::AllDebrid,
            ProviderKind::TorBox,
        ]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = DebridError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "realdebrid" | "rd" => Ok(ProviderKind::RealDebrid),
            "alldebrid" | "ad" => Ok(ProviderKind::AllDebrid),
            "torbox" | "tb" => Ok(ProviderKind::TorBox),
            _ => Err(DebridError::Configuration(format!(
                "unknown debrid provider: {s}"
            ))),
        }
    }
}

/// Capability contract every debrid vendor implements.
///
/// Adapters normalise vendor responses: file trees are flattened into
/// `/`-joined paths and vendor status strings are mapped onto
/// [`types::CacheStatus`]. Callers never branch on the vendor.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Instance name (used in logs and resolution paths)
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Submit a magnet link
    async fn add_magnet(&self, magnet: &str) -> Result<AddedRelease>;

    /// Upload the raw bytes of a `.torrent` file
    async fn add_torrent_file(&self, bytes: Vec<u8>, filename: &str) -> Result<AddedRelease>;

    /// Current state of a release, with a flat file list
    async fn release_info(&self, release_id: &str) -> Result<ReleaseInfo>;

    /// Request the given comma separated file ids. A no-op for vendors
    /// that process every file automatically.
    async fn select_files(&self, release_id: &str, file_ids: &str) -> Result<()>;

    /// Turn a provider link into a consumable URL
    async fn resolve_link(&self, link: &str) -> Result<DirectLink>;

    /// Remove a release from the account
    async fn delete_release(&self, release_id: &str) -> Result<()>;
}
