//! Multi-provider coordination
//!
//! Spreads a verification over every enabled provider according to the
//! configured [`MultiProviderMode`]:
//!
//! - `Fastest` races all providers; the first cached result wins and the
//!   others are cancelled between protocol steps. Losers that still come
//!   back cached are deleted by a background cleanup task.
//! - `Preferred` verifies everywhere and keeps the highest-priority cached
//!   result.
//! - `Sequential` tries providers in priority order and stops at the first
//!   cached result.
//!
//! A provider error only ends that provider's branch. Branch results are
//! collected by a spawned driver task, so a caller that goes away before
//! claiming the winner does not leave a release behind.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::MultiProviderMode;
use crate::debrid::Provider;
use crate::debrid::types::ReleaseCandidate;
use crate::error::{DebridError, Result};
use crate::services::cache_verifier::{CacheVerifier, Verification, VerifyOptions};

type BranchOutcome = (usize, Arc<dyn Provider>, Result<Verification>);

/// Winning verification plus any cleanup still running for the losers
pub struct CoordinatedVerification {
    pub winner: Verification,
    /// Provider holding the winning release
    pub provider: Arc<dyn Provider>,
    /// Deletes late losers; already finished when `None`
    pub cleanup: Option<JoinHandle<()>>,
}

impl CoordinatedVerification {
    /// Wait until every losing release has been removed
    pub async fn wait_for_cleanup(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Provider cleanup task panicked");
            }
        }
    }
}

pub struct MultiProviderCoordinator {
    verifier: Arc<CacheVerifier>,
    mode: MultiProviderMode,
}

impl MultiProviderCoordinator {
    pub fn new(verifier: Arc<CacheVerifier>, mode: MultiProviderMode) -> Self {
        Self { verifier, mode }
    }

    pub fn mode(&self) -> MultiProviderMode {
        self.mode
    }

    /// Verify a candidate across `providers` (priority order).
    ///
    /// With `opts.retain_on_cached` the winner's release stays on its
    /// account; every other release is removed.
    pub async fn verify(
        &self,
        providers: &[Arc<dyn Provider>],
        candidate: &ReleaseCandidate,
        opts: &VerifyOptions,
    ) -> Result<CoordinatedVerification> {
        if providers.is_empty() {
            return Err(DebridError::Configuration(
                "no debrid provider configured or enabled".to_string(),
            ));
        }

        let start = Instant::now();
        let outcome = match self.mode {
            MultiProviderMode::Fastest => self.race(providers, candidate, opts).await,
            MultiProviderMode::Preferred => self.preferred(providers, candidate, opts).await,
            MultiProviderMode::Sequential => self.sequential(providers, candidate, opts).await,
        };

        match &outcome {
            Ok(found) => info!(
                mode = %self.mode,
                provider = %found.winner.provider,
                release_id = %found.winner.release_id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Cached release found"
            ),
            Err(e) => info!(
                mode = %self.mode,
                providers = providers.len(),
                error = %e,
                "No provider has the release cached"
            ),
        }
        outcome
    }

    fn spawn_branch(
        &self,
        index: usize,
        provider: Arc<dyn Provider>,
        candidate: ReleaseCandidate,
        opts: VerifyOptions,
    ) -> JoinHandle<BranchOutcome> {
        let verifier = Arc::clone(&self.verifier);
        tokio::spawn(async move {
            let outcome = verifier.verify(provider.as_ref(), &candidate, &opts).await;
            (index, provider, outcome)
        })
    }

    async fn race(
        &self,
        providers: &[Arc<dyn Provider>],
        candidate: &ReleaseCandidate,
        opts: &VerifyOptions,
    ) -> Result<CoordinatedVerification> {
        let race_token = match &opts.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        // Dropping this future stops every branch at its next protocol step
        let _stop_on_drop = race_token.clone().drop_guard();
        let branch_opts = opts.clone().with_cancel(race_token.clone());

        let pending: FuturesUnordered<JoinHandle<BranchOutcome>> = providers
            .iter()
            .enumerate()
            .map(|(index, provider)| {
                self.spawn_branch(index, Arc::clone(provider), candidate.clone(), branch_opts.clone())
            })
            .collect();

        let (reply, outcome) = oneshot::channel();
        let driver = tokio::spawn(drive_race(
            Arc::clone(&self.verifier),
            pending,
            race_token,
            reply,
        ));
        claim(outcome, driver).await
    }

    async fn preferred(
        &self,
        providers: &[Arc<dyn Provider>],
        candidate: &ReleaseCandidate,
        opts: &VerifyOptions,
    ) -> Result<CoordinatedVerification> {
        let handles: Vec<_> = providers
            .iter()
            .enumerate()
            .map(|(index, provider)| {
                self.spawn_branch(index, Arc::clone(provider), candidate.clone(), opts.clone())
            })
            .collect();

        let (reply, outcome) = oneshot::channel();
        let driver = tokio::spawn(drive_preferred(Arc::clone(&self.verifier), handles, reply));
        claim(outcome, driver).await
    }

    async fn sequential(
        &self,
        providers: &[Arc<dyn Provider>],
        candidate: &ReleaseCandidate,
        opts: &VerifyOptions,
    ) -> Result<CoordinatedVerification> {
        let mut errors = Vec::new();
        for (index, provider) in providers.iter().enumerate() {
            match self.verifier.verify(provider.as_ref(), candidate, opts).await {
                Ok(verification) if verification.is_cached() => {
                    return Ok(CoordinatedVerification {
                        winner: verification,
                        provider: Arc::clone(provider),
                        cleanup: None,
                    });
                }
                outcome => {
                    let err = branch_error(outcome);
                    if matches!(err, DebridError::Cancelled) {
                        return Err(err);
                    }
                    debug!(provider = %provider.name(), error = %err, "Trying next provider");
                    errors.push((index, err));
                }
            }
        }
        Err(most_specific_error(errors))
    }
}

/// Cached release picked by a driver task, not yet handed to the caller
struct Claimable {
    winner: Verification,
    provider: Arc<dyn Provider>,
    losers_pending: bool,
}

type Reply = oneshot::Sender<Result<Claimable>>;

/// Wait for a driver task's verdict
async fn claim(
    outcome: oneshot::Receiver<Result<Claimable>>,
    driver: JoinHandle<()>,
) -> Result<CoordinatedVerification> {
    match outcome.await {
        Ok(Ok(found)) => Ok(CoordinatedVerification {
            winner: found.winner,
            provider: found.provider,
            cleanup: found.losers_pending.then_some(driver),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            error!("Provider coordination task ended without a result");
            Err(DebridError::Cancelled)
        }
    }
}

/// Hand the winner over; when nobody is waiting any more it is removed
async fn deliver(verifier: &CacheVerifier, reply: Reply, found: Claimable) {
    if let Err(Ok(unclaimed)) = reply.send(Ok(found)) {
        if unclaimed.winner.retained {
            info!(
                provider = %unclaimed.winner.provider,
                release_id = %unclaimed.winner.release_id,
                "Caller went away, removing winning release"
            );
            verifier
                .discard(unclaimed.provider.as_ref(), &unclaimed.winner.release_id)
                .await;
        }
    }
}

async fn drive_race(
    verifier: Arc<CacheVerifier>,
    mut pending: FuturesUnordered<JoinHandle<BranchOutcome>>,
    race_token: CancellationToken,
    reply: Reply,
) {
    let mut errors = Vec::new();
    let mut found = None;
    while let Some(joined) = pending.next().await {
        match joined {
            Ok((_, provider, Ok(verification))) if verification.is_cached() => {
                found = Some((verification, provider));
                break;
            }
            Ok((index, _, outcome)) => errors.push((index, branch_error(outcome))),
            Err(e) => error!(error = %e, "Provider verification task panicked"),
        }
    }

    let Some((winner, provider)) = found else {
        let _ = reply.send(Err(most_specific_error(errors)));
        return;
    };

    race_token.cancel();
    let losers_pending = !pending.is_empty();
    if losers_pending {
        debug!(remaining = pending.len(), "Cancelling losing providers");
    }
    deliver(
        &verifier,
        reply,
        Claimable {
            winner,
            provider,
            losers_pending,
        },
    )
    .await;

    while let Some(joined) = pending.next().await {
        match joined {
            Ok((_, provider, Ok(late))) if late.retained => {
                info!(
                    provider = %late.provider,
                    release_id = %late.release_id,
                    "Removing release from losing provider"
                );
                verifier.discard(provider.as_ref(), &late.release_id).await;
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Provider verification task panicked"),
        }
    }
}

async fn drive_preferred(
    verifier: Arc<CacheVerifier>,
    handles: Vec<JoinHandle<BranchOutcome>>,
    reply: Reply,
) {
    let mut errors = Vec::new();
    let mut found: Option<(Verification, Arc<dyn Provider>)> = None;
    for handle in handles {
        match handle.await {
            Ok((_, provider, Ok(verification))) if verification.is_cached() => {
                if found.is_none() {
                    found = Some((verification, provider));
                } else if verification.retained {
                    verifier
                        .discard(provider.as_ref(), &verification.release_id)
                        .await;
                }
            }
            Ok((index, _, outcome)) => errors.push((index, branch_error(outcome))),
            Err(e) => error!(error = %e, "Provider verification task panicked"),
        }
    }

    match found {
        Some((winner, provider)) => {
            let found = Claimable {
                winner,
                provider,
                losers_pending: false,
            };
            deliver(&verifier, reply, found).await;
        }
        None => {
            let _ = reply.send(Err(most_specific_error(errors)));
        }
    }
}

/// Error for a branch that did not produce a cached result
fn branch_error(outcome: Result<Verification>) -> DebridError {
    match outcome {
        Ok(verification) => DebridError::NotCached {
            status: verification.status.to_string(),
        },
        Err(e) => e,
    }
}

/// Pick the error worth reporting: a rejection reason first, then
/// not-cached, then whatever the highest-priority provider hit.
fn most_specific_error(mut errors: Vec<(usize, DebridError)>) -> DebridError {
    errors.sort_by_key(|(index, _)| *index);
    let pick = errors
        .iter()
        .position(|(_, e)| e.is_rejection())
        .or_else(|| errors.iter().position(|(_, e)| e.is_not_cached()))
        .unwrap_or(0);
    if pick < errors.len() {
        errors.swap_remove(pick).1
    } else {
        DebridError::Configuration("no debrid provider produced a result".to_string())
    }
}
