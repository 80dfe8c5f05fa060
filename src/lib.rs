//! lingua-relay: caching translation facade over unreliable LLM backends.
//! Library root: module wiring, logging setup, and the process entry point.

pub mod cancellation;
pub mod config;
pub mod frontend;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod translate;

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub use config::{ConfigError, ServiceConfig};
pub use service::{ServiceStatus, TranslationService};
pub use translate::http::{BackendSet, ChatBackend};
pub use translate::languages::LanguageTable;
pub use translate::{
    Backend, BackendError, ServedVia, TranslateError, TranslationRequest, TranslationResponse,
};

/// Environment switch for JSON log lines.
pub const LOG_JSON_ENV: &str = "LINGUA_RELAY_LOG_JSON";

/// Startup failures of the binary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the global subscriber. Logs go to stderr; stdout carries responses.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lingua_relay=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if std::env::var(LOG_JSON_ENV).as_deref() == Ok("1") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_languages(config: &ServiceConfig) -> LanguageTable {
    let Some(path) = config.languages_path.as_deref() else {
        return LanguageTable::builtin();
    };
    match LanguageTable::load_from_file(path) {
        Ok(table) => {
            info!(path = %path.display(), languages = table.len(), "language table loaded");
            table
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "language table load failed, using built-in");
            LanguageTable::builtin()
        }
    }
}

/// Build and run the service until stdin closes or Ctrl-C.
pub fn run() -> Result<(), ServiceError> {
    init_tracing();
    info!("lingua-relay starting");

    let config = ServiceConfig::load_or_default();
    let languages = load_languages(&config);
    let backends = ChatBackend::from_config(&config.backend).map_err(|e| {
        error!(error = %e, "backend setup failed");
        e
    })?;
    info!(
        models = ?config.backend.models,
        fallback = %config.backend.fallback_model,
        "backends ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let service = Arc::new(TranslationService::new(&config, backends, languages));
        service.start();
        let result =
            frontend::serve_lines(&service, &config.orchestrator.default_target_lang).await;
        service.shutdown().await;
        result
    })
}
