//! Shared harness for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use lingua_relay::translate::cache::CacheStore;
use lingua_relay::translate::mock::ScriptedBackend;
use lingua_relay::{Backend, BackendSet, LanguageTable, ServiceConfig, TranslationService};

pub struct Harness {
    pub service: Arc<TranslationService>,
    pub primary: Arc<ScriptedBackend>,
    pub secondary: Arc<ScriptedBackend>,
    pub fallback: Arc<ScriptedBackend>,
}

impl Harness {
    pub fn race_calls(&self) -> usize {
        self.primary.call_count() + self.secondary.call_count()
    }

    pub fn all_calls(&self) -> usize {
        self.race_calls() + self.fallback.call_count()
    }
}

pub fn harness(primary: ScriptedBackend, secondary: ScriptedBackend, fallback: ScriptedBackend) -> Harness {
    harness_with(
        ServiceConfig::default(),
        Arc::new(CacheStore::in_memory()),
        primary,
        secondary,
        fallback,
    )
}

pub fn harness_with(
    config: ServiceConfig,
    store: Arc<CacheStore>,
    primary: ScriptedBackend,
    secondary: ScriptedBackend,
    fallback: ScriptedBackend,
) -> Harness {
    let (primary, secondary, fallback) = (Arc::new(primary), Arc::new(secondary), Arc::new(fallback));
    let backends = BackendSet {
        candidates: vec![
            Arc::clone(&primary) as Arc<dyn Backend>,
            Arc::clone(&secondary) as Arc<dyn Backend>,
        ],
        fallback: Arc::clone(&fallback) as Arc<dyn Backend>,
    };
    let service = TranslationService::with_store(&config, backends, LanguageTable::builtin(), store);
    Harness {
        service: Arc::new(service),
        primary,
        secondary,
        fallback,
    }
}
