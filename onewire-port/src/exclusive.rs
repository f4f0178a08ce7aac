use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

/// How often a blocking [`ExclusiveGate::begin`] retries.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive ownership of an adapter, held by one thread at a time.
///
/// Acquiring is reentrant for the owning thread and releasing is single-level:
/// however many times the owner called [`begin`](Self::begin), one [`end`](Self::end)
/// frees the gate.
#[derive(Debug, Default)]
pub struct ExclusiveGate {
    owner: Mutex<Option<ThreadId>>,
}

impl ExclusiveGate {
    /// A free gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate for the calling thread.
    ///
    /// A non-blocking call returns `false` when another thread holds the gate.
    /// A blocking call polls every [`POLL_INTERVAL`] until the gate is free.
    pub fn begin(&self, blocking: bool) -> bool {
        loop {
            if self.try_begin() {
                return true;
            }
            if !blocking {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn try_begin(&self) -> bool {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        match *owner {
            Some(id) => id == me,
            None => {
                *owner = Some(me);
                true
            }
        }
    }

    /// Release the gate if the calling thread holds it.
    ///
    /// # Returns
    /// Whether the calling thread was the owner.
    pub fn end(&self) -> bool {
        let mut owner = self.owner.lock();
        if *owner == Some(thread::current().id()) {
            *owner = None;
            true
        } else {
            false
        }
    }

    /// Whether the calling thread holds the gate.
    pub fn held_by_current(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Whether any thread holds the gate.
    pub fn is_held(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Block until the gate is ours for the lifetime of the returned guard.
    ///
    /// When the calling thread already holds the gate the guard releases nothing.
    pub fn acquire(&self) -> ExclusiveGuard<'_> {
        let acquired = !self.held_by_current();
        if acquired {
            self.begin(true);
        }
        ExclusiveGuard { gate: self, acquired }
    }
}

/// Scoped hold on an [`ExclusiveGate`], released on drop if this guard took it.
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    gate: &'a ExclusiveGate,
    acquired: bool,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.gate.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reentrant_single_level() {
        let gate = ExclusiveGate::new();
        assert!(gate.begin(false));
        assert!(gate.begin(false));
        assert!(gate.held_by_current());
        assert!(gate.end());
        assert!(!gate.is_held());
        assert!(!gate.end());
    }

    #[test]
    fn other_threads_wait() {
        let gate = Arc::new(ExclusiveGate::new());
        assert!(gate.begin(true));

        let contender = Arc::clone(&gate);
        let refused = thread::spawn(move || contender.begin(false)).join().unwrap();
        assert!(!refused);

        let contender = Arc::clone(&gate);
        let waiter = thread::spawn(move || {
            let got = contender.begin(true);
            let held = contender.held_by_current();
            contender.end();
            got && held
        });
        thread::sleep(POLL_INTERVAL * 2);
        assert!(gate.end());
        assert!(waiter.join().unwrap());
        assert!(!gate.is_held());
    }

    #[test]
    fn guard_releases_only_what_it_took() {
        let gate = ExclusiveGate::new();
        {
            let _guard = gate.acquire();
            assert!(gate.held_by_current());
        }
        assert!(!gate.is_held());

        gate.begin(false);
        drop(gate.acquire());
        assert!(gate.held_by_current());
    }
}
