//! Re-entrancy interlock for the tick body.

use portable_atomic::{AtomicBool, Ordering};

/// Single-bit flag that is set for the duration of one tick.
pub struct ReentrancyGuard {
    active: AtomicBool,
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// Claims the guard. Returns `None` when another tick already holds it.
    #[must_use]
    pub fn try_enter(&self) -> Option<GuardToken<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GuardToken { guard: self })
    }

    /// Returns `true` while a tick holds the guard.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn exit(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Default for ReentrancyGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of entry; releases the guard when dropped.
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.exit();
    }
}
