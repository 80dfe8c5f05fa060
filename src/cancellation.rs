//! Cancellation framework: CancellationToken + generation guard.
//! Re-arming a timer cancels the previous token and advances the generation,
//! so a stale timer can neither keep sleeping nor dispatch its work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Issues one live token at a time. Advancing cancels the previous token.
pub struct TaskGeneration {
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the current token, advance the generation, and return a guard
    /// bound to the new generation.
    pub fn cancel_and_advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        let new_root = CancellationToken::new();
        let child = new_root.child_token();
        *token_guard = new_root;
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard::new(Arc::clone(&self.generation), gen, child)
    }

    #[cfg(test)]
    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel the live token without advancing.
    pub fn cancel_all(&self) {
        self.current_token.read().cancel();
    }
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a task; tells it whether it has been superseded.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    pub fn new(generation: Arc<AtomicU64>, my_generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            my_generation,
            token,
        }
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Not cancelled and not superseded.
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_supersedes_previous_guard() {
        let gen = TaskGeneration::new();
        let first = gen.cancel_and_advance();
        assert!(first.should_continue());
        assert_eq!(first.my_generation(), 1);

        let second = gen.cancel_and_advance();
        assert!(first.is_cancelled());
        assert!(!first.is_current());
        assert!(second.should_continue());
        assert_eq!(gen.current_generation(), 2);
    }

    #[test]
    fn cancel_all_keeps_generation() {
        let gen = TaskGeneration::new();
        let guard = gen.cancel_and_advance();
        gen.cancel_all();
        assert!(guard.is_cancelled());
        assert!(guard.is_current());
        assert!(!guard.should_continue());
    }
}
