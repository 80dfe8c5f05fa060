//! Backend coordinator: race several backends, first usable answer wins.
//! Losers are detached, not aborted. If nothing usable arrives before the
//! overall deadline, one sequential call goes to the designated fallback.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Backend;
use crate::metrics::{metric_names, MetricsRegistry};

/// Timeouts and thresholds for one race.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// How many candidates are called concurrently.
    pub fan_out: usize,
    pub per_call_timeout: Duration,
    pub overall_timeout: Duration,
    pub fallback_timeout: Duration,
    /// A cleaned answer must be longer than this many characters.
    pub min_usable_chars: usize,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            fan_out: 2,
            per_call_timeout: Duration::from_secs(20),
            overall_timeout: Duration::from_secs(25),
            fallback_timeout: Duration::from_secs(30),
            min_usable_chars: 3,
        }
    }
}

pub struct BackendCoordinator {
    candidates: Vec<Arc<dyn Backend>>,
    fallback: Arc<dyn Backend>,
    config: RaceConfig,
    metrics: Arc<MetricsRegistry>,
}

impl BackendCoordinator {
    pub fn new(
        candidates: Vec<Arc<dyn Backend>>,
        fallback: Arc<dyn Backend>,
        config: RaceConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            candidates,
            fallback,
            config,
            metrics,
        }
    }

    #[cfg(test)]
    pub(crate) fn config(&self) -> &RaceConfig {
        &self.config
    }

    fn is_usable(&self, cleaned: &str) -> bool {
        cleaned.chars().count() > self.config.min_usable_chars
    }

    /// Race `prompt` across the first `fan_out` candidates. Returns the cleaned
    /// winner, the fallback's answer, or `None` when every attempt failed.
    pub async fn race(&self, prompt: &str, fallback_prompt: Option<&str>) -> Option<String> {
        let span = self.metrics.span(metric_names::BACKEND_RACE);
        let deadline = Instant::now() + self.config.overall_timeout;
        let prompt: Arc<str> = Arc::from(prompt);

        let mut pending: FuturesUnordered<_> = self
            .candidates
            .iter()
            .take(self.config.fan_out)
            .map(|backend| {
                let backend = Arc::clone(backend);
                let prompt = Arc::clone(&prompt);
                let metrics = Arc::clone(&self.metrics);
                let timeout = self.config.per_call_timeout;
                tokio::spawn(async move {
                    let answer = guarded_call(backend.as_ref(), &prompt, timeout, &metrics).await;
                    (backend.name().to_string(), answer)
                })
            })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(Ok((name, Some(raw))))) => {
                    let cleaned = clean_output(&raw);
                    if self.is_usable(&cleaned) {
                        info!(backend = %name, chars = cleaned.chars().count(), "race_won");
                        span.finish();
                        return Some(cleaned);
                    }
                    debug!(backend = %name, "unusable answer discarded");
                }
                Ok(Some(Ok((_, None)))) => {}
                Ok(Some(Err(e))) => warn!(error = %e, "race task panicked"),
                Ok(None) => {
                    debug!("all race candidates finished without a usable answer");
                    break;
                }
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.overall_timeout.as_millis() as u64,
                        "race overall timeout"
                    );
                    break;
                }
            }
        }
        // Remaining calls keep running detached; their answers are ignored.
        drop(pending);

        let prompt = fallback_prompt.unwrap_or(&prompt);
        info!(backend = %self.fallback.name(), "race fallback");
        let answer = self.call_designated(prompt, self.config.fallback_timeout).await;
        span.finish();
        answer
    }

    /// One fault-isolated call to the designated backend, cleaned.
    pub async fn call_once(&self, prompt: &str, timeout: Duration) -> Option<String> {
        self.call_designated(prompt, timeout).await
    }

    async fn call_designated(&self, prompt: &str, timeout: Duration) -> Option<String> {
        guarded_call(self.fallback.as_ref(), prompt, timeout, &self.metrics)
            .await
            .map(|raw| clean_output(&raw))
            .filter(|cleaned| !cleaned.is_empty())
    }
}

/// Any error or timeout becomes `None`; nothing propagates.
async fn guarded_call(
    backend: &dyn Backend,
    prompt: &str,
    timeout: Duration,
    metrics: &MetricsRegistry,
) -> Option<String> {
    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, backend.generate(prompt, timeout)).await;
    metrics.record(
        metric_names::BACKEND_CALL,
        start.elapsed().as_micros() as f64,
    );
    match outcome {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => {
            warn!(backend = backend.name(), "backend returned empty output");
            None
        }
        Ok(Err(e)) => {
            warn!(backend = backend.name(), error = %e, "backend call failed");
            None
        }
        Err(_) => {
            warn!(
                backend = backend.name(),
                timeout_ms = timeout.as_millis() as u64,
                "backend call timed out"
            );
            None
        }
    }
}

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('«', '»'),
    ('“', '”'),
    ('„', '“'),
    ('「', '」'),
];

fn boilerplate_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:translated text|translation|result|answer|output|перевод|результат|ответ|übersetzung|traduction|traducción|traduzione|翻译|译文)\s*[:：]\s*",
        )
        .expect("boilerplate prefix regex is valid")
    })
}

/// Strip translator boilerplate ("Translation:", "Перевод:", …) and one pair of
/// wrapping quotes, then trim.
pub fn clean_output(raw: &str) -> String {
    let mut text = raw.trim();
    while let Some(m) = boilerplate_prefix().find(text) {
        text = text[m.end()..].trim_start();
    }
    let text = text.trim();
    let mut chars = text.chars();
    if let (Some(first), Some(last)) = (chars.next(), chars.next_back()) {
        if QUOTE_PAIRS.contains(&(first, last)) {
            return text[first.len_utf8()..text.len() - last.len_utf8()]
                .trim()
                .to_string();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::mock::ScriptedBackend;

    fn coordinator(
        candidates: Vec<Arc<ScriptedBackend>>,
        fallback: Arc<ScriptedBackend>,
        config: RaceConfig,
    ) -> BackendCoordinator {
        BackendCoordinator::new(
            candidates
                .into_iter()
                .map(|b| b as Arc<dyn Backend>)
                .collect(),
            fallback,
            config,
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_usable_answer_wins_without_waiting_for_hung_sibling() {
        let a = Arc::new(ScriptedBackend::replying("a", "Hallo Welt").delayed(Duration::from_secs(1)));
        let b = Arc::new(ScriptedBackend::hanging("b"));
        let fallback = Arc::new(ScriptedBackend::failing("fallback"));
        let coord = coordinator(vec![a.clone(), b.clone()], fallback.clone(), RaceConfig::default());

        let start = Instant::now();
        let result = coord.race("prompt", None).await;
        assert_eq!(result.as_deref(), Some("Hallo Welt"));
        assert!(start.elapsed() < coord.config().per_call_timeout);
        assert_eq!(b.call_count(), 1);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn trivial_answers_do_not_win() {
        let a = Arc::new(ScriptedBackend::replying("a", "ok"));
        let b = Arc::new(ScriptedBackend::replying("b", "Guten Tag").delayed(Duration::from_secs(2)));
        let fallback = Arc::new(ScriptedBackend::failing("fallback"));
        let coord = coordinator(vec![a, b], fallback, RaceConfig::default());
        assert_eq!(coord.race("p", None).await.as_deref(), Some("Guten Tag"));
    }

    #[tokio::test(start_paused = true)]
    async fn only_fan_out_candidates_are_called() {
        let a = Arc::new(ScriptedBackend::failing("a"));
        let b = Arc::new(ScriptedBackend::failing("b"));
        let c = Arc::new(ScriptedBackend::replying("c", "never asked"));
        let fallback = Arc::new(ScriptedBackend::replying("fallback", "Translation: \"Bonjour\""));
        let coord = coordinator(vec![a, b, c.clone()], fallback.clone(), RaceConfig::default());

        let result = coord.race("full prompt", Some("short prompt")).await;
        assert_eq!(result.as_deref(), Some("Bonjour"));
        assert_eq!(c.call_count(), 0);
        assert_eq!(fallback.calls(), vec!["short prompt".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_triggers_single_fallback_call() {
        let config = RaceConfig {
            overall_timeout: Duration::from_secs(5),
            ..RaceConfig::default()
        };
        let a = Arc::new(ScriptedBackend::replying("a", "too late").delayed(Duration::from_secs(10)));
        let b = Arc::new(ScriptedBackend::hanging("b"));
        let fallback = Arc::new(ScriptedBackend::replying("fallback", "Rescued"));
        let coord = coordinator(vec![a, b], fallback.clone(), config);

        let start = Instant::now();
        assert_eq!(coord.race("p", None).await.as_deref(), Some("Rescued"));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(fallback.calls(), vec!["p".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_is_none() {
        let a = Arc::new(ScriptedBackend::failing("a"));
        let b = Arc::new(ScriptedBackend::replying("b", "   "));
        let fallback = Arc::new(ScriptedBackend::failing("fallback"));
        let coord = coordinator(vec![a, b], fallback.clone(), RaceConfig::default());
        assert_eq!(coord.race("p", None).await, None);
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn call_once_times_out_quietly() {
        let fallback = Arc::new(ScriptedBackend::hanging("fallback"));
        let coord = coordinator(vec![], fallback, RaceConfig::default());
        assert_eq!(coord.call_once("p", Duration::from_secs(1)).await, None);
    }

    #[test]
    fn clean_output_strips_prefixes_and_quotes() {
        assert_eq!(clean_output("Translation: Hello"), "Hello");
        assert_eq!(clean_output("  ПЕРЕВОД: \"Hallo Welt\"  "), "Hallo Welt");
        assert_eq!(clean_output("result:Answer: «Bonjour»"), "Bonjour");
        assert_eq!(clean_output("翻译：你好"), "你好");
        assert_eq!(clean_output("\"quoted\" and \"more\""), "quoted\" and \"more");
        assert_eq!(clean_output("Resultant force"), "Resultant force");
        assert_eq!(clean_output("\""), "\"");
    }
}
