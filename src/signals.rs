//! Interrupt handling
//!
//! Ctrl-C sets a shared flag instead of killing the process. Long-running
//! handlers and backends poll the flag, and the session rolls the stores
//! back when a command is interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag and report whether it was set
    pub fn reset(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Route Ctrl-C to `token`. Only one handler can be installed per process.
pub fn install_interrupt_handler(token: &CancelToken) -> Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || token.cancel())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
        assert!(token.reset());
        assert!(!other.is_cancelled());
        assert!(!token.reset());
    }
}
