mod common;

use std::sync::Arc;

use common::harness_with;
use futures_util::future::join_all;
use lingua_relay::translate::cache::{CacheStore, Tier};
use lingua_relay::translate::mock::ScriptedBackend;
use lingua_relay::{ServiceConfig, TranslationRequest};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_requests_and_flushes_keep_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServiceConfig::default();
    config.cache.dir = dir.path().to_path_buf();
    let h = harness_with(
        config,
        Arc::new(CacheStore::new(dir.path())),
        ScriptedBackend::replying("primary", "Übersetzter Text"),
        ScriptedBackend::failing("secondary"),
        ScriptedBackend::failing("fallback"),
    );

    let translations = (0..32).map(|i| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move {
            let n = i % 16;
            let text = format!("alpha{n} beta{n} gamma{n}");
            service
                .translate(TranslationRequest::new(text, "en", "de"))
                .await
        })
    });
    let flushes = (0..4).map(|_| {
        let service = Arc::clone(&h.service);
        tokio::spawn(async move {
            service.flush().await;
        })
    });
    let flushes: Vec<_> = flushes.collect();

    let responses = join_all(translations).await;
    for response in responses {
        let response = response.unwrap();
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.translation.as_deref(), Some("Übersetzter Text"));
    }
    for flush in join_all(flushes).await {
        flush.unwrap();
    }

    assert_eq!(h.service.status().full_entries, 16);
    h.service.shutdown().await;
    assert!(!h.service.store().is_dirty(Tier::Full));

    let reloaded = CacheStore::new(dir.path());
    reloaded.load_from_disk();
    assert_eq!(reloaded.len_full(), 16);
    for i in 0..16 {
        assert_eq!(
            reloaded
                .lookup_phrase(&format!("alpha{i} beta{i} gamma{i}"), "en", "de")
                .as_deref(),
            Some("Übersetzter Text")
        );
    }
    assert_eq!(
        reloaded.lookup_word("alpha7", "en", "de").as_deref(),
        Some("übersetzter")
    );
}

#[tokio::test(start_paused = true)]
async fn identical_requests_in_flight_together_agree() {
    let h = common::harness(
        ScriptedBackend::replying("primary", "Hallo Welt"),
        ScriptedBackend::failing("secondary"),
        ScriptedBackend::failing("fallback"),
    );
    let requests = (0..10).map(|_| {
        h.service
            .translate(TranslationRequest::new("hello world", "en", "de"))
    });
    let responses = join_all(requests).await;
    assert!(responses
        .iter()
        .all(|r| r.translation.as_deref() == Some("Hallo Welt")));
    assert_eq!(h.service.status().full_entries, 1);
    assert_eq!(
        h.service.store().lookup_word("hello", "en", "de").as_deref(),
        Some("hallo")
    );
}
