//! Cache verification protocol against a scripted provider
//!
//! Every path that added a release must delete it exactly once, except a
//! cached verification that asked to retain the release.

mod common;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use librarian_debrid::debrid::types::{CacheStatus, ReleaseCandidate, attrs};
use librarian_debrid::error::DebridError;
use librarian_debrid::services::VerifyOptions;

use common::{Call, FakeProvider, MB, Step, episode_candidate, magnet_candidate, verifier};

// ============================================================================
// Protocol order
// ============================================================================

#[tokio::test]
async fn test_protocol_call_order() {
    let provider = FakeProvider::new("rd")
        .with_files(&[
            (1, "Show.S01E01.mkv", 50 * MB),
            (2, "Show.S01E02.mkv", 900 * MB),
            (3, "Show.sample.mp4", 5 * MB),
            (4, "info.nfo", 1024),
        ]);
    let candidate = episode_candidate("Show.S01.1080p", 1, 2);

    let verification = verifier()
        .verify(&provider, &candidate, &VerifyOptions::default())
        .await
        .unwrap();

    assert!(verification.is_cached());
    assert!(!verification.retained);
    assert_eq!(verification.info_hash, "abcdef0123456789");
    assert_eq!(verification.selection.preferred_label, "Show.S01E02.mkv");
    assert_eq!(verification.selection.ordered_ids.first(), Some(&2));
    assert_eq!(verification.preferred_link(), Some("https://rd.example/d/2"));

    let id = provider.release_id();
    assert_eq!(
        provider.calls(),
        vec![
            Call::AddMagnet("magnet:?xt=urn:btih:ABCDEF0123456789&dn=release".into()),
            Call::Info(id.clone()),
            Call::Select(id.clone(), "2,1,3".into()),
            Call::Info(id.clone()),
            Call::Delete(id),
        ]
    );
}

#[tokio::test]
async fn test_magnet_rebuilt_from_info_hash() {
    let provider = FakeProvider::new("rd");
    let candidate = ReleaseCandidate::new("Movie.2024", "").with_attribute(attrs::INFO_HASH, "ABC123");

    verifier()
        .verify(&provider, &candidate, &VerifyOptions::default())
        .await
        .unwrap();

    assert_eq!(provider.calls()[0], Call::AddMagnet("magnet:?xt=urn:btih:abc123".into()));
}

#[tokio::test]
async fn test_candidate_without_source() {
    let provider = FakeProvider::new("rd");
    let candidate = ReleaseCandidate::new("Movie.2024", "");

    let err = verifier()
        .verify(&provider, &candidate, &VerifyOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "missing info hash and no torrent URL available");
    assert!(provider.calls().is_empty());

    let result = verifier().check_health(&provider, &candidate, false).await;
    assert_eq!(result.status, CacheStatus::Error);
    assert!(!result.healthy);
}

// ============================================================================
// Exactly one delete
// ============================================================================

mod cleanup {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn verify_deletes(provider: &FakeProvider, candidate: &ReleaseCandidate, retain: bool) -> usize {
        let opts = if retain {
            VerifyOptions::retaining()
        } else {
            VerifyOptions::default()
        };
        let _ = verifier().verify(provider, candidate, &opts).await;
        provider.deletes()
    }

    #[tokio::test]
    async fn test_cached_verification_deletes_once() {
        let provider = FakeProvider::new("rd");
        assert_eq!(verify_deletes(&provider, &magnet_candidate("Movie"), false).await, 1);
    }

    #[tokio::test]
    async fn test_cached_retained_keeps_release() {
        let provider = FakeProvider::new("rd");
        let verification = verifier()
            .verify(&provider, &magnet_candidate("Movie"), &VerifyOptions::retaining())
            .await
            .unwrap();
        assert!(verification.retained);
        assert_eq!(provider.deletes(), 0);
    }

    #[tokio::test]
    async fn test_not_cached_deletes_once_even_when_retaining() {
        let provider = FakeProvider::new("tb").with_status(CacheStatus::Downloading);
        let verification = verifier()
            .verify(&provider, &magnet_candidate("Movie"), &VerifyOptions::retaining())
            .await
            .unwrap();
        assert!(!verification.is_cached());
        assert!(!verification.retained);
        assert_eq!(provider.deletes(), 1);
    }

    #[tokio::test]
    async fn test_failures_after_add_delete_once() {
        for step in [Step::FirstInfo, Step::Select, Step::SecondInfo] {
            let provider = FakeProvider::new("rd").failing_at(step);
            assert_eq!(
                verify_deletes(&provider, &magnet_candidate("Movie"), true).await,
                1,
                "step {step:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_add_has_nothing_to_delete() {
        let provider = FakeProvider::new("rd").failing_at(Step::Add);
        assert_eq!(verify_deletes(&provider, &magnet_candidate("Movie"), false).await, 0);
    }

    #[tokio::test]
    async fn test_no_media_deletes_once() {
        let provider = FakeProvider::new("rd").with_files(&[(1, "readme.txt", 10), (2, "cover.jpg", 10)]);
        let err = verifier()
            .verify(&provider, &magnet_candidate("Movie"), &VerifyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no media files found in release");
        assert_eq!(provider.deletes(), 1);
        assert!(!provider.calls().iter().any(|c| matches!(c, Call::Select(..))));
    }

    #[tokio::test]
    async fn test_wrong_episode_rejected_with_reason() {
        let provider = FakeProvider::new("rd")
            .with_files(&[(1, "Show.S02E01.mkv", 50 * MB), (2, "Show.S02E02.mkv", 50 * MB)]);
        let err = verifier()
            .verify(&provider, &episode_candidate("Show.S02", 2, 5), &VerifyOptions::retaining())
            .await
            .unwrap_err();
        assert_matches!(&err, DebridError::Rejection(_));
        assert_eq!(err.to_string(), "target episode S02E05 not found in torrent");
        assert_eq!(provider.deletes(), 1);
    }

    #[tokio::test]
    async fn test_failing_delete_is_swallowed() {
        let provider = FakeProvider::new("rd").failing_at(Step::Delete);
        let verification = verifier()
            .verify(&provider, &magnet_candidate("Movie"), &VerifyOptions::default())
            .await
            .unwrap();
        assert!(verification.is_cached());
        assert_eq!(provider.deletes(), 1);
    }
}

// ============================================================================
// Health results
// ============================================================================

mod health {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_health_cached() {
        let provider = FakeProvider::new("rd");
        let result = verifier()
            .check_health(&provider, &magnet_candidate("Movie"), false)
            .await;
        assert!(result.healthy);
        assert_eq!(result.status, CacheStatus::Cached);
        assert_eq!(result.provider, "rd");
        assert_eq!(result.info_hash, "abcdef0123456789");
        assert_eq!(provider.deletes(), 1);
    }

    #[tokio::test]
    async fn test_health_queued_is_not_cached() {
        let provider = FakeProvider::new("rd").with_status(CacheStatus::Queued);
        let result = verifier()
            .check_health(&provider, &magnet_candidate("Movie"), false)
            .await;
        assert!(!result.healthy);
        assert_eq!(result.status, CacheStatus::NotCached);
    }

    #[tokio::test]
    async fn test_health_rejection_carries_reason() {
        let provider = FakeProvider::new("rd").with_files(&[(1, "Show.S02E06.mkv", 900 * common::MB)]);
        let result = verifier()
            .check_health(&provider, &episode_candidate("Show", 2, 5), false)
            .await;
        assert_eq!(result.status, CacheStatus::Error);
        let message = result.error_message.unwrap();
        assert!(message.contains("does not match target S02E05"), "{message}");
        assert_eq!(provider.deletes(), 1);
    }

    #[tokio::test]
    async fn test_health_transport_error() {
        let provider = FakeProvider::new("rd").failing_at(Step::SecondInfo);
        let result = verifier()
            .check_health(&provider, &magnet_candidate("Movie"), false)
            .await;
        assert_eq!(result.status, CacheStatus::Error);
        assert!(result.error_message.unwrap().contains("SecondInfo failed"));
    }
}

// ============================================================================
// Track probing
// ============================================================================

mod tracks {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    use librarian_debrid::services::TrackProbeCache;

    use common::FakeProber;

    const HASH: &str = "abcdef0123456789";

    #[tokio::test]
    async fn test_tracks_probed_from_link_resolved_before_delete() {
        let provider = FakeProvider::new("rd");
        let prober = FakeProber::new(2);
        let verifier = verifier()
            .with_prober(prober.clone())
            .with_track_cache(TrackProbeCache::new(prober.clone()));
        let candidate = magnet_candidate("Movie");

        let first = verifier.check_health(&provider, &candidate, true).await;
        assert!(first.healthy);
        assert!(first.tracks_loading);
        assert!(first.audio_tracks.is_empty());

        let id = provider.release_id();
        let calls = provider.calls();
        let resolved = calls
            .iter()
            .position(|c| *c == Call::Resolve("https://rd.example/d/1".into()))
            .expect("link resolved");
        let deleted = calls
            .iter()
            .position(|c| *c == Call::Delete(id.clone()))
            .expect("release deleted");
        assert!(resolved < deleted, "{calls:?}");

        let cache = verifier.track_cache().expect("track cache configured");
        for _ in 0..100 {
            if cache.lookup(HASH).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            prober.probed_urls(),
            vec!["https://rd.example/d/1?token=direct".to_string()]
        );

        let second = verifier.check_health(&provider, &candidate, true).await;
        assert!(second.healthy);
        assert!(!second.tracks_loading);
        assert_eq!(second.audio_tracks.len(), 1);
        assert_eq!(second.audio_tracks[0].language, "eng");
        assert_eq!(second.track_probe_error, None);

        let resolves = provider
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Resolve(_)))
            .count();
        assert_eq!(resolves, 1);
        assert_eq!(provider.deletes(), 2);
    }

    #[tokio::test]
    async fn test_tracks_skipped_when_not_requested() {
        let provider = FakeProvider::new("rd");
        let prober = FakeProber::new(2);
        let verifier = verifier()
            .with_prober(prober.clone())
            .with_track_cache(TrackProbeCache::new(prober.clone()));

        let result = verifier
            .check_health(&provider, &magnet_candidate("Movie"), false)
            .await;
        assert!(result.healthy);
        assert!(!result.tracks_loading);
        assert!(!provider.calls().iter().any(|c| matches!(c, Call::Resolve(_))));
        assert!(prober.probed_urls().is_empty());
    }
}

// ============================================================================
// Torrent file upload
// ============================================================================

mod torrent_upload {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TORRENT: &[u8] = b"d4:infod6:lengthi1024e4:name10:Movie.2024ee";

    async fn serve(body: &[u8]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/7"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(&server)
            .await;
        server
    }

    fn torrent_candidate(server: &MockServer) -> ReleaseCandidate {
        ReleaseCandidate::new("Movie.2024.1080p", "")
            .with_attribute(attrs::TORRENT_URL, format!("{}/dl/7", server.uri()))
    }

    #[tokio::test]
    async fn test_torrent_url_is_uploaded() {
        let server = serve(TORRENT).await;
        let provider = FakeProvider::new("rd");

        let verification = verifier()
            .verify(&provider, &torrent_candidate(&server), &VerifyOptions::default())
            .await
            .unwrap();

        assert!(verification.is_cached());
        assert_eq!(verification.info_hash, "feedface");
        let id = provider.release_id();
        assert_eq!(
            provider.calls(),
            vec![
                Call::AddTorrent("7.torrent".into()),
                Call::Info(id.clone()),
                Call::Select(id.clone(), "1".into()),
                Call::Info(id.clone()),
                Call::Delete(id),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_bencoded_download_never_reaches_provider() {
        let server = serve(b"<html>login required</html>").await;
        let provider = FakeProvider::new("rd");

        let err = verifier()
            .verify(&provider, &torrent_candidate(&server), &VerifyOptions::default())
            .await
            .unwrap_err();

        assert_matches!(err, DebridError::Decode { .. });
        assert!(provider.calls().is_empty());
    }
}
