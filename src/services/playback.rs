//! Playback resolution
//!
//! Turns a release candidate into something the streaming layer can play.
//! The winning release stays on the provider account; every other release
//! touched along the way is removed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::MultiProviderMode;
use crate::debrid::Provider;
use crate::debrid::registry::ProviderRegistry;
use crate::debrid::types::{
    CacheStatus, CacheVerificationResult, PlaybackResolution, ReleaseCandidate, attrs,
};
use crate::error::{DebridError, Result};
use crate::services::cache_verifier::{CacheVerifier, Verification, VerifyOptions};
use crate::services::multi_provider::MultiProviderCoordinator;

/// Candidates checked by [`PlaybackResolver::filter_cached_results`]
pub const MAX_FILTER_CHECKS: usize = 3;

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar", ".rar", ".zip", ".7z"];

/// Archive extension of a download URL's path, if it has one we cannot stream
pub fn archive_extension(download_url: &str) -> Option<&'static str> {
    let parsed = url::Url::parse(download_url.trim()).ok()?;
    let path = parsed.path().to_ascii_lowercase();
    ARCHIVE_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .copied()
}

/// `/debrid/{provider}/{release_id}[/file/{file_id}][/{filename}]`
pub fn resolution_path(
    provider: &str,
    release_id: &str,
    file_id: Option<u32>,
    filename: Option<&str>,
) -> String {
    let mut path = format!("/debrid/{provider}/{release_id}");
    if let Some(id) = file_id {
        path.push_str(&format!("/file/{id}"));
    }
    if let Some(name) = filename.map(str::trim).filter(|n| !n.is_empty()) {
        path.push('/');
        path.push_str(name);
    }
    path
}

fn is_http_url(link: &str) -> bool {
    link.starts_with("http://") || link.starts_with("https://")
}

pub struct PlaybackResolver {
    registry: Arc<ProviderRegistry>,
    verifier: Arc<CacheVerifier>,
    coordinator: MultiProviderCoordinator,
}

impl PlaybackResolver {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        verifier: Arc<CacheVerifier>,
        mode: MultiProviderMode,
    ) -> Self {
        let coordinator = MultiProviderCoordinator::new(Arc::clone(&verifier), mode);
        Self {
            registry,
            verifier,
            coordinator,
        }
    }

    pub fn verifier(&self) -> &Arc<CacheVerifier> {
        &self.verifier
    }

    /// Resolve a candidate to a playable reference.
    ///
    /// On success the referenced release is left on the provider account
    /// and belongs to the caller.
    pub async fn resolve(&self, candidate: &ReleaseCandidate) -> Result<PlaybackResolution> {
        let start = Instant::now();
        info!(title = %candidate.title, "Resolving playback");

        if candidate.is_preresolved() {
            return self.resolve_preresolved(candidate).await;
        }

        let opts = VerifyOptions::retaining();
        let (provider, verification) = if let Some(name) = candidate.provider_hint() {
            let provider = self.registry.get(name).ok_or_else(|| {
                DebridError::Configuration(format!("provider {name} not configured or not enabled"))
            })?;
            debug!(provider = %provider.name(), "Using explicit provider");
            let verification = self.verifier.verify(provider.as_ref(), candidate, &opts).await?;
            (provider, verification)
        } else {
            let providers = self.registry.enabled();
            match providers.as_slice() {
                [] => {
                    return Err(DebridError::Configuration(
                        "no debrid provider configured or enabled".to_string(),
                    ));
                }
                [only] => {
                    let verification = self.verifier.verify(only.as_ref(), candidate, &opts).await?;
                    (Arc::clone(only), verification)
                }
                _ => {
                    debug!(
                        providers = providers.len(),
                        mode = %self.coordinator.mode(),
                        "Checking providers"
                    );
                    // Losers are removed in the background
                    let coordinated = self.coordinator.verify(&providers, candidate, &opts).await?;
                    (coordinated.provider, coordinated.winner)
                }
            }
        };

        let resolution = self
            .complete_resolution(provider.as_ref(), candidate, verification)
            .await?;
        info!(
            path = %resolution.path,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Playback resolved"
        );
        Ok(resolution)
    }

    /// Build the resolution for a verified release, removing it when it
    /// cannot be played.
    async fn complete_resolution(
        &self,
        provider: &dyn Provider,
        candidate: &ReleaseCandidate,
        verification: Verification,
    ) -> Result<PlaybackResolution> {
        if !verification.is_cached() {
            if verification.retained {
                self.verifier
                    .discard(provider, &verification.release_id)
                    .await;
            }
            return Err(DebridError::NotCached {
                status: verification.status.to_string(),
            });
        }

        let Some(link) = verification.preferred_link().map(str::to_string) else {
            self.verifier
                .discard(provider, &verification.release_id)
                .await;
            return Err(DebridError::provider(
                provider.name(),
                "no download links available",
            ));
        };

        if is_http_url(&link) {
            if let Some(ext) = archive_extension(&link) {
                self.verifier
                    .discard(provider, &verification.release_id)
                    .await;
                return Err(DebridError::Rejection(format!(
                    "download URL points to unsupported archive ({ext})"
                )));
            }
        } else {
            debug!(link = %link, "Internal link reference, resolved at stream time");
        }

        let preferred = verification
            .info
            .files
            .iter()
            .find(|f| f.id == verification.selection.preferred_id);
        let filename = preferred.map(|f| f.file_name().to_string());
        let file_size = match candidate.size_bytes {
            0 => preferred.map(|f| f.bytes).unwrap_or_default(),
            size => size,
        };

        info!(
            provider = %provider.name(),
            release_id = %verification.release_id,
            file_id = verification.selection.preferred_id,
            "Keeping release for playback"
        );

        Ok(PlaybackResolution {
            path: resolution_path(
                provider.name(),
                &verification.release_id,
                Some(verification.selection.preferred_id),
                filename.as_deref(),
            ),
            download_url: link,
            health_status: CacheStatus::Cached,
            file_size,
            provider: Some(provider.name().to_string()),
            release_id: Some(verification.release_id),
            file_id: Some(verification.selection.preferred_id),
        })
    }

    async fn resolve_preresolved(&self, candidate: &ReleaseCandidate) -> Result<PlaybackResolution> {
        let Some(stream_url) = candidate.stream_url().map(str::to_string) else {
            return Err(DebridError::InvalidCandidate(
                "pre-resolved stream missing stream_url".to_string(),
            ));
        };

        let health = self.verifier.check_preresolved(candidate, false).await;
        if !health.healthy {
            let reason = health.error_message.unwrap_or_else(|| health.status.to_string());
            info!(title = %candidate.title, reason = %reason, "Pre-resolved stream not cached");
            return Err(DebridError::Rejection(format!("stream not cached: {reason}")));
        }

        info!(
            title = %candidate.title,
            filename = %candidate.attribute(attrs::RAW_TITLE).unwrap_or(&candidate.title),
            "Using pre-resolved stream"
        );
        Ok(PlaybackResolution {
            path: stream_url.clone(),
            download_url: stream_url,
            health_status: CacheStatus::Cached,
            file_size: candidate.size_bytes,
            provider: candidate.attribute(attrs::TRACKER).map(str::to_string),
            release_id: None,
            file_id: None,
        })
    }

    /// Health check without keeping anything on the provider account.
    ///
    /// Uses the explicit provider when the candidate names one, otherwise the
    /// highest-priority enabled provider.
    pub async fn check_health(
        &self,
        candidate: &ReleaseCandidate,
        want_tracks: bool,
    ) -> CacheVerificationResult {
        if candidate.is_preresolved() {
            return self.verifier.check_preresolved(candidate, want_tracks).await;
        }

        let info_hash = candidate.info_hash().unwrap_or_default();
        let provider = match candidate.provider_hint() {
            Some(name) => self.registry.get(name).ok_or_else(|| {
                (
                    name.to_string(),
                    format!("provider {name} not configured or not enabled"),
                )
            }),
            None => self.registry.enabled().into_iter().next().ok_or_else(|| {
                (
                    String::new(),
                    "no debrid provider configured or enabled".to_string(),
                )
            }),
        };

        match provider {
            Ok(provider) => {
                self.verifier
                    .check_health(provider.as_ref(), candidate, want_tracks)
                    .await
            }
            Err((name, message)) => {
                CacheVerificationResult::failed(&name, &info_hash, CacheStatus::Error, message)
            }
        }
    }

    /// Cached candidates among the first [`MAX_FILTER_CHECKS`]
    pub async fn filter_cached_results(
        &self,
        candidates: &[ReleaseCandidate],
    ) -> Vec<ReleaseCandidate> {
        let mut cached = Vec::new();
        for (idx, candidate) in candidates.iter().take(MAX_FILTER_CHECKS).enumerate() {
            let health = self.check_health(candidate, false).await;
            if health.healthy {
                cached.push(candidate.clone());
            } else {
                debug!(
                    position = idx + 1,
                    title = %candidate.title,
                    status = %health.status,
                    error = ?health.error_message,
                    "Candidate not cached"
                );
            }
        }
        if candidates.len() > MAX_FILTER_CHECKS {
            warn!(
                skipped = candidates.len() - MAX_FILTER_CHECKS,
                "Health check limit reached, remaining candidates skipped"
            );
        }
        info!(
            cached = cached.len(),
            checked = candidates.len().min(MAX_FILTER_CHECKS),
            "Filtered cached results"
        );
        cached
    }
}
