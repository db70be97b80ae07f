//! Cooperative cancellation of the long-running loops, typically triggered
//! by Ctrl+C.

use log::info;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A flag shared between whoever wants a loop to stop and the loop itself.
/// Loops check it once per tick; a tick in progress always completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests every loop holding a clone of this token to stop.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancels `token` when the process receives an interrupt. Only one handler
/// can be installed per process.
pub fn install_interrupt_handler(token: &CancellationToken) -> Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        token.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
