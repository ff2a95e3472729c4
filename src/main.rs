//! debrid-check - verify a release against the configured debrid providers
//!
//! Prints the playback resolution (or, with `--health`, the verification
//! result) as JSON on stdout. Logs go to stderr.

mod cli;

use std::sync::Arc;
use std::time::{Duration, Instant};

use librarian_debrid::debrid::types::CacheVerificationResult;
use librarian_debrid::services::logging::init_tracing;
use librarian_debrid::services::{CacheVerifier, PlaybackResolver};
use librarian_debrid::{Config, ProviderRegistry};

use crate::cli::{CliOptions, Command, USAGE};

const TRACK_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let Some(options) = CliOptions::from_args()? else {
        println!("{USAGE}");
        return Ok(());
    };

    let registry = Arc::new(ProviderRegistry::from_config(&config)?);
    tracing::info!(
        providers = registry.len(),
        mode = %config.multi_provider_mode,
        "Configuration loaded"
    );
    let verifier = Arc::new(CacheVerifier::from_config(&config)?);
    let resolver = PlaybackResolver::new(registry, Arc::clone(&verifier), config.multi_provider_mode);
    let candidate = options.candidate();

    let output = match options.command {
        Command::Resolve => serde_json::to_string_pretty(&resolver.resolve(&candidate).await?)?,
        Command::Health => {
            let mut result = resolver.check_health(&candidate, options.want_tracks).await;
            if result.tracks_loading {
                wait_for_tracks(&verifier, &mut result, config.track_probe_timeout).await;
            }
            serde_json::to_string_pretty(&result)?
        }
    };
    println!("{output}");

    if let Some(cache) = verifier.track_cache() {
        cache.shutdown();
    }
    Ok(())
}

/// Poll the track cache until the background probe lands
async fn wait_for_tracks(verifier: &CacheVerifier, result: &mut CacheVerificationResult, timeout: Duration) {
    let Some(cache) = verifier.track_cache() else {
        return;
    };
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        tokio::time::sleep(TRACK_POLL_INTERVAL).await;
        if let Some(entry) = cache.lookup(&result.info_hash) {
            result.audio_tracks = entry.audio_tracks;
            result.subtitle_tracks = entry.subtitle_tracks;
            result.track_probe_error = entry.probe_error;
            result.tracks_loading = false;
            return;
        }
    }
    tracing::warn!(info_hash = %result.info_hash, "Track probe still running, giving up");
}
