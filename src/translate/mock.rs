//! Scripted in-process backend for tests and offline runs.
//! Records every prompt; answers, fails or hangs per a responder closure.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Backend, BackendError};

pub enum Reply {
    Text(String),
    Fail,
    Hang,
}

type Responder = Box<dyn Fn(&str) -> Reply + Send + Sync>;

pub struct ScriptedBackend {
    name: String,
    delay: Duration,
    responder: Responder,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn with(name: &str, responder: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(name: &str, text: &str) -> Self {
        let text = text.to_string();
        Self::with(name, move |_| Reply::Text(text.clone()))
    }

    pub fn failing(name: &str) -> Self {
        Self::with(name, |_| Reply::Fail)
    }

    pub fn hanging(name: &str) -> Self {
        Self::with(name, |_| Reply::Hang)
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, BackendError> {
        self.calls.lock().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match (self.responder)(prompt) {
            Reply::Text(text) => Ok(text),
            Reply::Fail => Err(BackendError::Transport("scripted failure".into())),
            Reply::Hang => std::future::pending().await,
        }
    }
}
