//! Translation orchestrator.
//! Owns the cache store, batch scheduler and backend coordinator, and runs the
//! per-request pipeline: validate → detect → full cache → reconstruct → race.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{OrchestratorSection, ServiceConfig};
use crate::metrics::{metric_names, request_id, MetricSummary, MetricsRegistry};
use crate::scheduler::BatchScheduler;
use crate::translate::cache::{CacheStore, FlushReport, Tier};
use crate::translate::http::BackendSet;
use crate::translate::languages::LanguageTable;
use crate::translate::normalize::{detect_language, substitute_tokens, tokenize, unique_tokens};
use crate::translate::race::BackendCoordinator;
use crate::translate::{
    prompt, ServedVia, TranslateError, TranslationRequest, TranslationResponse, AUTO_LANG,
};

/// Snapshot for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub full_entries: usize,
    pub word_entries: usize,
    pub full_dirty: bool,
    pub word_dirty: bool,
    pub pending_pairs: usize,
    pub pending_words: usize,
    pub in_flight_batches: usize,
    pub languages: usize,
    pub metrics: BTreeMap<String, MetricSummary>,
}

/// Terminal state of a successful request.
struct Served {
    translation: String,
    source_lang: String,
    via: ServedVia,
}

type Autosave = (CancellationToken, JoinHandle<()>);

pub struct TranslationService {
    store: Arc<CacheStore>,
    scheduler: Arc<BatchScheduler>,
    coordinator: Arc<BackendCoordinator>,
    languages: Arc<LanguageTable>,
    metrics: Arc<MetricsRegistry>,
    settings: OrchestratorSection,
    flush_interval: Duration,
    autosave: Mutex<Option<Autosave>>,
}

impl TranslationService {
    /// Service persisting under `config.cache.dir`.
    pub fn new(config: &ServiceConfig, backends: BackendSet, languages: LanguageTable) -> Self {
        let store = Arc::new(CacheStore::new(config.cache.dir.clone()));
        Self::with_store(config, backends, languages, store)
    }

    pub fn with_store(
        config: &ServiceConfig,
        backends: BackendSet,
        languages: LanguageTable,
        store: Arc<CacheStore>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let languages = Arc::new(languages);
        let coordinator = Arc::new(BackendCoordinator::new(
            backends.candidates,
            backends.fallback,
            config.race_config(),
            Arc::clone(&metrics),
        ));
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&store),
            Arc::clone(&coordinator),
            Arc::clone(&languages),
            Arc::clone(&metrics),
            config.scheduler_config(),
        ));
        Self {
            store,
            scheduler,
            coordinator,
            languages,
            metrics,
            settings: config.orchestrator.clone(),
            flush_interval: config.flush_interval(),
            autosave: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Load persisted tiers and start the periodic flush. Calling twice is a no-op.
    pub fn start(&self) {
        let mut slot = self.autosave.lock();
        if slot.is_some() {
            return;
        }
        self.store.load_from_disk();

        let token = CancellationToken::new();
        let stop = token.clone();
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let period = self.flush_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        flush_store(Arc::clone(&store), &metrics).await;
                    }
                }
            }
            debug!("autosave loop stopped");
        });
        *slot = Some((token, handle));
        info!(
            interval_secs = period.as_secs(),
            full = self.store.len_full(),
            words = self.store.len_word(),
            "service started"
        );
    }

    /// Persist dirty tiers now.
    pub async fn flush(&self) -> FlushReport {
        flush_store(Arc::clone(&self.store), &self.metrics).await
    }

    /// Stop autosave, cancel armed batches, then flush once more.
    pub async fn shutdown(&self) {
        let autosave = self.autosave.lock().take();
        if let Some((token, handle)) = autosave {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "autosave task ended abnormally");
            }
        }
        self.scheduler.cancel_all();
        let report = self.flush().await;
        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "service stopped"
        );
    }

    pub fn status(&self) -> ServiceStatus {
        let batches = self.scheduler.stats();
        ServiceStatus {
            full_entries: self.store.len_full(),
            word_entries: self.store.len_word(),
            full_dirty: self.store.is_dirty(Tier::Full),
            word_dirty: self.store.is_dirty(Tier::Word),
            pending_pairs: batches.pending_pairs,
            pending_words: batches.pending_words,
            in_flight_batches: batches.in_flight,
            languages: self.languages.len(),
            metrics: self.metrics.summary(),
        }
    }

    /// Translate one request. Every failure is reported in the response.
    pub async fn translate(&self, request: TranslationRequest) -> TranslationResponse {
        let id = request_id();
        let span = info_span!(
            "translate",
            request_id = %id,
            source = %request.source_lang,
            target = %request.target_lang
        );
        let timing = self.metrics.span(metric_names::TRANSLATE_DONE);
        let outcome = self.run_pipeline(&request).instrument(span).await;
        timing.finish();

        match outcome {
            Ok(served) => TranslationResponse {
                id: request.id,
                success: true,
                translation: Some(served.translation),
                source_language_name: Some(self.languages.display_name(&served.source_lang)),
                target_language_name: Some(self.languages.display_name(&request.target_lang)),
                detected_language: Some(served.source_lang),
                served_from: Some(served.via),
                error: None,
            },
            Err(e) => TranslationResponse {
                id: request.id,
                ..TranslationResponse::failure(&e)
            },
        }
    }

    async fn run_pipeline(&self, request: &TranslationRequest) -> Result<Served, TranslateError> {
        let started = Instant::now();
        let text = request.text.trim();
        if text.is_empty() {
            debug!("rejected empty text");
            return Err(TranslateError::EmptyText);
        }
        let len = text.chars().count();
        let max = self.settings.max_text_chars;
        if len > max {
            debug!(len, max, "rejected oversized text");
            return Err(TranslateError::TooLong { len, max });
        }

        let source = if request.source_lang == AUTO_LANG {
            let detected = detect_language(text);
            debug!(detected, "source language detected");
            detected.to_string()
        } else {
            request.source_lang.clone()
        };
        let target = request.target_lang.as_str();

        if let Some(cached) = self.store.lookup_phrase(text, &source, target) {
            self.metrics.record(
                metric_names::FULL_CACHE_HIT,
                started.elapsed().as_micros() as f64,
            );
            info!("full_cache_hit");
            return Ok(Served {
                translation: cached,
                source_lang: source,
                via: ServedVia::FullCache,
            });
        }

        if let Some(rebuilt) = self.reconstruct(text, &source, target) {
            self.store.save_phrase(text, &source, target, &rebuilt);
            self.metrics.record(
                metric_names::RECONSTRUCTED,
                started.elapsed().as_micros() as f64,
            );
            return Ok(Served {
                translation: rebuilt,
                source_lang: source,
                via: ServedVia::Reconstructed,
            });
        }

        let full_prompt = prompt::translation_prompt(&self.languages, text, &source, target);
        let short_prompt = prompt::fallback_prompt(&self.languages, text, &source, target);
        match self.coordinator.race(&full_prompt, Some(&short_prompt)).await {
            Some(translation) => {
                self.store.save_phrase(text, &source, target, &translation);
                let seeded = self.seed_words(text, &translation, &source, target);
                info!(chars = translation.chars().count(), seeded, "backend_translation");
                Ok(Served {
                    translation,
                    source_lang: source,
                    via: ServedVia::Backend,
                })
            }
            None => {
                warn!("no backend produced a translation");
                Err(TranslateError::Unavailable)
            }
        }
    }

    /// Build a translation from the word tier when enough tokens are known.
    /// Unknown tokens are handed to the scheduler either way.
    fn reconstruct(&self, text: &str, source: &str, target: &str) -> Option<String> {
        let unique = unique_tokens(&tokenize(text));
        if unique.is_empty() {
            return None;
        }
        let total = unique.len();
        let mut known = HashMap::with_capacity(total);
        let mut missing = Vec::new();
        for token in unique {
            match self.store.lookup_word(&token, source, target) {
                Some(translated) => {
                    known.insert(token, translated);
                }
                None => missing.push(token),
            }
        }
        self.scheduler.schedule_words(&missing, source, target);

        let coverage = known.len() as f64 / total as f64;
        if coverage < self.settings.reconstruction_threshold {
            debug!(known = known.len(), total, coverage, "word coverage too low");
            return None;
        }
        info!(known = known.len(), total, coverage, "reconstructed_from_words");
        Some(substitute_tokens(text, &known))
    }

    /// Positional word alignment of a backend answer into the word tier.
    fn seed_words(&self, original: &str, translation: &str, source: &str, target: &str) -> usize {
        let min = self.settings.min_seed_word_chars;
        let translated = tokenize(translation);
        let mut seeded = 0;
        for (word, rendered) in tokenize(original).iter().zip(&translated) {
            if word.chars().count() < min || rendered.chars().count() < min {
                continue;
            }
            self.store.save_word(word, source, target, rendered);
            seeded += 1;
        }
        seeded
    }
}

async fn flush_store(store: Arc<CacheStore>, metrics: &Arc<MetricsRegistry>) -> FlushReport {
    let timing = metrics.span(metric_names::FLUSH);
    let report = match tokio::task::spawn_blocking(move || store.flush()).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "flush task failed");
            FlushReport::default()
        }
    };
    timing.finish();
    if !report.written.is_empty() || !report.failed.is_empty() {
        info!(written = ?report.written, failed = ?report.failed, "cache_flushed");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::mock::ScriptedBackend;
    use crate::translate::Backend;

    struct Fixture {
        service: TranslationService,
        a: Arc<ScriptedBackend>,
        b: Arc<ScriptedBackend>,
        fallback: Arc<ScriptedBackend>,
    }

    fn fixture(a: ScriptedBackend, b: ScriptedBackend, fallback: ScriptedBackend) -> Fixture {
        let (a, b, fallback) = (Arc::new(a), Arc::new(b), Arc::new(fallback));
        let backends = BackendSet {
            candidates: vec![
                Arc::clone(&a) as Arc<dyn Backend>,
                Arc::clone(&b) as Arc<dyn Backend>,
            ],
            fallback: Arc::clone(&fallback) as Arc<dyn Backend>,
        };
        let service = TranslationService::with_store(
            &ServiceConfig::default(),
            backends,
            LanguageTable::builtin(),
            Arc::new(CacheStore::in_memory()),
        );
        Fixture {
            service,
            a,
            b,
            fallback,
        }
    }

    fn race_calls(f: &Fixture) -> usize {
        f.a.call_count() + f.b.call_count()
    }

    #[tokio::test(start_paused = true)]
    async fn mostly_cached_words_reconstruct_without_race() {
        let f = fixture(
            ScriptedBackend::replying("a", "Die Katze saß"),
            ScriptedBackend::replying("b", "Die Katze saß"),
            ScriptedBackend::replying("fallback", "saß"),
        );
        let store = f.service.store();
        store.save_word("the", "en", "de", "der");
        store.save_word("cat", "en", "de", "katze");

        let response = f
            .service
            .translate(TranslationRequest::new("The cat, sat!", "en", "de"))
            .await;
        assert!(response.success);
        assert_eq!(response.translation.as_deref(), Some("der katze, sat!"));
        assert_eq!(response.served_from, Some(ServedVia::Reconstructed));
        assert_eq!(race_calls(&f), 0);
        assert!(store.lookup_phrase("the cat, sat!", "en", "de").is_some());

        // The missing word is batched in the background.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.fallback.call_count(), 1);
        assert_eq!(store.lookup_word("sat", "en", "de").as_deref(), Some("saß"));
    }

    #[tokio::test(start_paused = true)]
    async fn sparse_word_coverage_goes_to_race() {
        let f = fixture(
            ScriptedBackend::replying("a", "Die Katze saß"),
            ScriptedBackend::hanging("b"),
            ScriptedBackend::failing("fallback"),
        );
        f.service.store().save_word("the", "en", "de", "der");

        let response = f
            .service
            .translate(TranslationRequest::new("the cat sat", "en", "de"))
            .await;
        assert_eq!(response.translation.as_deref(), Some("Die Katze saß"));
        assert_eq!(response.served_from, Some(ServedVia::Backend));
        assert_eq!(f.a.call_count(), 1);
        assert!(f.a.calls()[0].contains("TARGET LANGUAGE: Deutsch"));
    }

    #[tokio::test(start_paused = true)]
    async fn length_limit_is_inclusive() {
        let f = fixture(
            ScriptedBackend::replying("a", "translated"),
            ScriptedBackend::replying("b", "translated"),
            ScriptedBackend::failing("fallback"),
        );

        let too_long = f
            .service
            .translate(TranslationRequest::new("a".repeat(5001), "en", "de"))
            .await;
        assert!(!too_long.success);
        assert!(too_long.error.unwrap_or_default().contains("too long"));
        assert_eq!(race_calls(&f), 0);
        assert_eq!(f.service.status().full_entries, 0);

        let at_limit = f
            .service
            .translate(TranslationRequest::new("ы".repeat(5000), "ru", "de"))
            .await;
        assert!(at_limit.success);
        assert!(race_calls(&f) > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_text_is_rejected_before_any_work() {
        let f = fixture(
            ScriptedBackend::replying("a", "x"),
            ScriptedBackend::replying("b", "x"),
            ScriptedBackend::replying("fallback", "x"),
        );
        let response = f
            .service
            .translate(TranslationRequest::new(" \n\t ", AUTO_LANG, "de"))
            .await;
        assert_eq!(response, TranslationResponse::failure(&TranslateError::EmptyText));
        assert_eq!(race_calls(&f) + f.fallback.call_count(), 0);
        assert_eq!(f.service.status().pending_words, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_is_reported_as_unavailable() {
        let f = fixture(
            ScriptedBackend::failing("a"),
            ScriptedBackend::failing("b"),
            ScriptedBackend::failing("fallback"),
        );
        let response = f
            .service
            .translate(TranslationRequest::new("hello world", "en", "de"))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("translation unavailable"));
        assert_eq!(f.service.status().full_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_answer_seeds_word_tier() {
        let f = fixture(
            ScriptedBackend::replying("a", "Der große Hund b"),
            ScriptedBackend::hanging("b"),
            ScriptedBackend::failing("fallback"),
        );
        let response = f
            .service
            .translate(TranslationRequest::new("the big dog a", "en", "de"))
            .await;
        assert_eq!(response.served_from, Some(ServedVia::Backend));

        let store = f.service.store();
        assert_eq!(store.lookup_word("the", "en", "de").as_deref(), Some("der"));
        assert_eq!(store.lookup_word("big", "en", "de").as_deref(), Some("große"));
        assert_eq!(store.lookup_word("dog", "en", "de").as_deref(), Some("hund"));
        assert!(store.lookup_word("a", "en", "de").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn response_names_languages() {
        let f = fixture(
            ScriptedBackend::replying("a", "Bonjour le monde"),
            ScriptedBackend::hanging("b"),
            ScriptedBackend::failing("fallback"),
        );
        let response = f
            .service
            .translate(TranslationRequest::new("Hello, this is the world", AUTO_LANG, "fr"))
            .await;
        assert_eq!(response.detected_language.as_deref(), Some("en"));
        assert_eq!(response.source_language_name.as_deref(), Some("English"));
        assert_eq!(response.target_language_name.as_deref(), Some("Français"));
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_and_shutdown_flush_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.cache.dir = dir.path().to_path_buf();
        config.cache.flush_interval_secs = 10;
        let backends = BackendSet {
            candidates: vec![Arc::new(ScriptedBackend::failing("a")) as Arc<dyn Backend>],
            fallback: Arc::new(ScriptedBackend::failing("fallback")),
        };
        let service = TranslationService::new(&config, backends, LanguageTable::builtin());
        service.start();

        service.store().save_phrase("hello", "en", "de", "hallo");
        assert!(service.status().full_dirty);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!service.status().full_dirty);
        assert!(dir.path().join("full_cache.json").exists());

        service.store().save_word("cat", "en", "de", "katze");
        service.shutdown().await;
        assert!(dir.path().join("word_cache.json").exists());
        assert!(service.metrics().count(metric_names::FLUSH) >= 2);
    }
}
