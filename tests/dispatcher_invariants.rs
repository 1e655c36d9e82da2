//! Dispatcher-level invariants: throttling fairness, settings-snapshot
//! stability, at-most-once outcomes, and the concurrency bounds.

mod helpers;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use helpers::{
    GatedFetcher, StaticRenderer, StaticTranscriber, StructuredEditor, build_dispatcher, fake_audio,
};
use transcript_worker::clients::{AudioRef, FetchError, MediaFetcher};
use transcript_worker::job::{FailureKind, MediaSource, Platform, Request, RequesterId};
use transcript_worker::limiter::ConcurrencyLimiter;
use transcript_worker::settings::{Settings, SettingsStore};

fn youtube_request(requester: i64) -> Request {
    Request::new(
        RequesterId(requester),
        MediaSource::Url {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            platform: Platform::Youtube,
        },
    )
}

// Scenario D: a requester at its per-requester bound is refused immediately;
// no stage starts and no slot is consumed.
#[tokio::test]
async fn requester_at_bound_is_throttled_without_starting_a_stage() {
    let (fetcher, gate) = GatedFetcher::new();
    let limiter = Arc::new(ConcurrencyLimiter::new(4, 1));
    let dispatcher = Arc::new(build_dispatcher(
        fetcher.clone(),
        Arc::new(StaticTranscriber::new("words")),
        Arc::new(StructuredEditor::default()),
        Arc::new(StaticRenderer),
        Arc::new(SettingsStore::new(Settings::default())),
        Arc::clone(&limiter),
    ));

    let first = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.submit(youtube_request(1)).await })
    };
    while fetcher.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let failure = dispatcher
        .submit(youtube_request(1))
        .await
        .expect_err("second submission must be throttled");
    assert!(matches!(failure.kind, FailureKind::Throttled));
    assert_eq!(failure.stage, None);
    assert_eq!(failure.attempts_made, 0);
    assert_eq!(
        fetcher.calls.load(Ordering::SeqCst),
        1,
        "the refused job never reached a stage"
    );
    assert_eq!(limiter.available_slots(), 3, "refusal consumed no slot");

    gate.add_permits(1);
    first
        .await
        .expect("task should not panic")
        .expect("held job should still succeed");
    assert_eq!(limiter.available_slots(), 4);
}

// A throttled requester does not affect other requesters.
#[tokio::test]
async fn throttling_one_requester_leaves_others_admitted() {
    let (fetcher, gate) = GatedFetcher::new();
    let limiter = Arc::new(ConcurrencyLimiter::new(4, 1));
    let dispatcher = Arc::new(build_dispatcher(
        fetcher.clone(),
        Arc::new(StaticTranscriber::new("words")),
        Arc::new(StructuredEditor::default()),
        Arc::new(StaticRenderer),
        Arc::new(SettingsStore::new(Settings::default())),
        limiter,
    ));

    let first = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.submit(youtube_request(1)).await })
    };
    while fetcher.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(dispatcher.submit(youtube_request(1)).await.is_err());

    let second = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.submit(youtube_request(2)).await })
    };
    while fetcher.calls.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    gate.add_permits(2);
    assert!(first.await.expect("no panic").is_ok());
    assert!(second.await.expect("no panic").is_ok());
}

// Settings stability: changing settings after submission does not alter the
// in-flight job's behavior.
#[tokio::test]
async fn settings_changes_do_not_affect_in_flight_jobs() {
    let (fetcher, gate) = GatedFetcher::new();
    let store = Arc::new(SettingsStore::new(Settings::default()));
    store.set_translation(RequesterId(5), true);

    let dispatcher = Arc::new(build_dispatcher(
        fetcher.clone(),
        Arc::new(StaticTranscriber::new("some speech")),
        Arc::new(StructuredEditor::default()),
        Arc::new(StaticRenderer),
        Arc::clone(&store),
        Arc::new(ConcurrencyLimiter::new(4, 2)),
    ));

    let job = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.submit(youtube_request(5)).await })
    };
    while fetcher.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Flip the setting while the job is mid-acquire, then let it finish.
    store.set_translation(RequesterId(5), false);
    gate.add_permits(1);

    let output = job
        .await
        .expect("task should not panic")
        .expect("job should succeed");
    let markdown = String::from_utf8(output.markdown).expect("markdown is utf-8");
    assert!(
        markdown.contains("> 中文翻译。"),
        "job keeps the snapshot taken at submission (translation on)"
    );
}

/// Fetcher that records the peak number of simultaneous calls.
struct ConcurrencyProbeFetcher {
    in_flight: AtomicU32,
    peak: AtomicU32,
}

#[async_trait]
impl MediaFetcher for ConcurrencyProbeFetcher {
    async fn fetch(&self, _source: &MediaSource, workdir: &Path) -> Result<AudioRef, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(fake_audio(workdir))
    }
}

// Concurrency invariant: never more than G jobs in flight, and every
// submission yields exactly one terminal outcome.
#[tokio::test]
async fn global_bound_caps_simultaneous_jobs() {
    let fetcher = Arc::new(ConcurrencyProbeFetcher {
        in_flight: AtomicU32::new(0),
        peak: AtomicU32::new(0),
    });
    let limiter = Arc::new(ConcurrencyLimiter::new(2, 1));
    let dispatcher = Arc::new(build_dispatcher(
        fetcher.clone(),
        Arc::new(StaticTranscriber::new("words")),
        Arc::new(StructuredEditor::default()),
        Arc::new(StaticRenderer),
        Arc::new(SettingsStore::new(Settings::default())),
        Arc::clone(&limiter),
    ));

    // Six requesters, one job each: all are admitted (per-requester bound is
    // never hit) but at most two run at once.
    let tasks: Vec<_> = (1..=6)
        .map(|requester| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.submit(youtube_request(requester)).await })
        })
        .collect();

    let outcomes = join_all(tasks).await;
    assert_eq!(outcomes.len(), 6);
    for outcome in outcomes {
        outcome
            .expect("task should not panic")
            .expect("every job should succeed");
    }

    assert!(
        fetcher.peak.load(Ordering::SeqCst) <= 2,
        "global bound of 2 was exceeded: peak {}",
        fetcher.peak.load(Ordering::SeqCst)
    );
    assert_eq!(limiter.available_slots(), 2, "all tokens were released");
}
