//! Debounced word-batch scheduler.
//! Uncached words are accumulated per (source, target) pair; each new arrival
//! re-arms the pair's timer. When a timer survives the debounce window the
//! batch is detached and sent to the backend as a single call.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::state_machine::PairState;
use crate::translate::cache::CacheStore;
use crate::translate::languages::LanguageTable;
use crate::translate::prompt;
use crate::translate::race::BackendCoordinator;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period after the latest arrival before a batch is sent.
    pub debounce: Duration,
    /// Words beyond this are dropped from a batch; a later miss re-schedules them.
    pub max_batch_words: usize,
    pub call_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            max_batch_words: 50,
            call_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LangPair {
    pub source: String,
    pub target: String,
}

impl LangPair {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

impl fmt::Display for LangPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// Accumulator for one language pair.
struct PendingBatch {
    words: Vec<String>,
    state: PairState,
    timer: TaskGeneration,
    in_flight: usize,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            state: PairState::Idle,
            timer: TaskGeneration::new(),
            in_flight: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Pairs with an armed timer.
    pub pending_pairs: usize,
    /// Words waiting across all armed pairs.
    pub pending_words: usize,
    /// Batches currently awaiting the backend.
    pub in_flight: usize,
    /// Batches sent since start.
    pub dispatched_total: u64,
}

pub struct BatchScheduler {
    pairs: Mutex<HashMap<LangPair, PendingBatch>>,
    store: Arc<CacheStore>,
    coordinator: Arc<BackendCoordinator>,
    languages: Arc<LanguageTable>,
    metrics: Arc<MetricsRegistry>,
    config: SchedulerConfig,
    dispatched: AtomicU64,
}

impl BatchScheduler {
    pub fn new(
        store: Arc<CacheStore>,
        coordinator: Arc<BackendCoordinator>,
        languages: Arc<LanguageTable>,
        metrics: Arc<MetricsRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pairs: Mutex::new(HashMap::new()),
            store,
            coordinator,
            languages,
            metrics,
            config,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Merge `words` into the pair's pending batch and (re)arm its timer.
    /// Returns immediately; dispatch happens on a spawned task.
    pub fn schedule_words(self: &Arc<Self>, words: &[String], source_lang: &str, target_lang: &str) {
        if words.is_empty() {
            return;
        }
        let pair = LangPair::new(source_lang, target_lang);
        let (guard, pending) = {
            let mut pairs = self.pairs.lock();
            let batch = pairs.entry(pair.clone()).or_insert_with(PendingBatch::new);
            for word in words {
                if !batch.words.contains(word) {
                    batch.words.push(word.clone());
                }
            }
            if let Err(e) = batch.state.transition(PairState::Armed) {
                warn!(pair = %pair, error = %e, "unexpected batch state");
            }
            (batch.timer.cancel_and_advance(), batch.words.len())
        };
        debug!(pair = %pair, pending, generation = guard.my_generation(), "batch_armed");

        let this = Arc::clone(self);
        let delay = self.config.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.token().cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            this.fire(pair, guard).await;
        });
    }

    async fn fire(&self, pair: LangPair, guard: GenerationGuard) {
        let words = {
            let mut pairs = self.pairs.lock();
            let Some(batch) = pairs.get_mut(&pair) else {
                return;
            };
            // Re-arming happens under this lock, so the check cannot race it.
            if !guard.should_continue() {
                return;
            }
            if let Err(e) = batch.state.transition(PairState::Dispatching) {
                warn!(pair = %pair, error = %e, "timer fired in unexpected state");
                return;
            }
            batch.in_flight += 1;
            std::mem::take(&mut batch.words)
        };
        self.dispatch(&pair, words).await;
        self.finish_dispatch(&pair);
    }

    async fn dispatch(&self, pair: &LangPair, words: Vec<String>) {
        let mut remaining: Vec<String> = words
            .into_iter()
            .filter(|w| self.store.lookup_word(w, &pair.source, &pair.target).is_none())
            .collect();
        if remaining.is_empty() {
            debug!(pair = %pair, "batch resolved meanwhile, nothing to send");
            return;
        }
        if remaining.len() > self.config.max_batch_words {
            debug!(
                pair = %pair,
                dropped = remaining.len() - self.config.max_batch_words,
                "batch capped"
            );
            remaining.truncate(self.config.max_batch_words);
        }

        let span = self.metrics.span(metric_names::BATCH_DISPATCH);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(pair = %pair, words = remaining.len(), "batch_dispatched");
        let prompt = prompt::word_batch_prompt(&self.languages, &remaining, &pair.source, &pair.target);

        match self.coordinator.call_once(&prompt, self.config.call_timeout).await {
            Some(reply) => {
                let translations: Vec<&str> = reply.split_whitespace().collect();
                if translations.len() != remaining.len() {
                    debug!(
                        pair = %pair,
                        requested = remaining.len(),
                        returned = translations.len(),
                        "word count mismatch, pairing positionally"
                    );
                }
                let mut written = 0usize;
                for (word, translated) in remaining.iter().zip(translations) {
                    let translated = translated.trim_matches(|c: char| !c.is_alphanumeric());
                    if translated.is_empty() {
                        continue;
                    }
                    self.store
                        .save_word(word, &pair.source, &pair.target, &translated.to_lowercase());
                    written += 1;
                }
                info!(pair = %pair, written, "batch_words_cached");
            }
            None => {
                warn!(pair = %pair, words = remaining.len(), "batch dropped after backend failure");
            }
        }
        span.finish();
    }

    fn finish_dispatch(&self, pair: &LangPair) {
        let mut pairs = self.pairs.lock();
        let idle = match pairs.get_mut(pair) {
            Some(batch) => {
                batch.in_flight = batch.in_flight.saturating_sub(1);
                batch.in_flight == 0 && batch.state != PairState::Armed
            }
            None => false,
        };
        if idle {
            pairs.remove(pair);
        }
    }

    /// Cancel every armed timer and discard pending words. In-flight batches finish.
    pub fn cancel_all(&self) {
        let mut pairs = self.pairs.lock();
        let mut discarded = 0usize;
        for (pair, batch) in pairs.iter_mut() {
            batch.timer.cancel_all();
            if batch.state == PairState::Armed {
                discarded += batch.words.len();
                batch.words.clear();
                if let Err(e) = batch.state.transition(PairState::Idle) {
                    warn!(pair = %pair, error = %e, "unexpected batch state on cancel");
                }
            }
        }
        pairs.retain(|_, batch| batch.in_flight > 0);
        if discarded > 0 {
            info!(discarded, "pending batches cancelled");
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let pairs = self.pairs.lock();
        let armed = pairs.values().filter(|b| b.state == PairState::Armed);
        SchedulerStats {
            pending_pairs: armed.clone().count(),
            pending_words: armed.map(|b| b.words.len()).sum(),
            in_flight: pairs.values().map(|b| b.in_flight).sum(),
            dispatched_total: self.dispatched.load(Ordering::Relaxed),
        }
    }
}
