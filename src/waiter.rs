// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// In-process condition-variable + mutex wrapper used by Channel workers and
// the reassembly worker to sleep/wake on "packets-available" and shutdown
// signals: `wait_if`/`notify`/`broadcast`/`quit_waiting` built on
// `std::sync::{Mutex, Condvar}` rather than named process-shared
// primitives, since this crate never crosses a process boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A waiter combining a condition variable, a mutex, and a quit flag.
///
/// Used internally to implement blocking `receive_packet` and the Channel
/// worker idle loops with bounded timeouts.
pub struct Waiter {
    cond: Condvar,
    lock: Mutex<()>,
    quit: AtomicBool,
}

impl Waiter {
    /// Create a fresh waiter, initially not quitting.
    pub fn new() -> Self {
        Self {
            cond: Condvar::new(),
            lock: Mutex::new(()),
            quit: AtomicBool::new(false),
        }
    }

    /// Block until `pred` returns `false`, quit is signalled, or
    /// `timeout_ms` elapses. Returns `false` on timeout, `true` otherwise
    /// (signalled or predicate already satisfied).
    pub fn wait_if<F>(&self, pred: F, timeout_ms: Option<u64>) -> bool
    where
        F: Fn() -> bool,
    {
        let mut guard = self.lock.lock().unwrap();
        loop {
            if self.quit.load(Ordering::Relaxed) || !pred() {
                return true;
            }
            match timeout_ms {
                None => {
                    guard = self.cond.wait(guard).unwrap();
                }
                Some(ms) => {
                    let (g, result) = self
                        .cond
                        .wait_timeout(guard, Duration::from_millis(ms))
                        .unwrap();
                    guard = g;
                    if result.timed_out() {
                        return !(pred() && !self.quit.load(Ordering::Relaxed));
                    }
                }
            }
        }
    }

    /// Wake one waiter.
    pub fn notify(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn broadcast(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_all();
    }

    /// Signal quit and wake every waiter so they can observe it.
    pub fn quit_waiting(&self) {
        self.quit.store(true, Ordering::Release);
        self.broadcast();
    }

    /// Whether `quit_waiting` has been called.
    pub fn is_quitting(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn wait_if_returns_immediately_when_predicate_false() {
        let w = Waiter::new();
        assert!(w.wait_if(|| false, Some(50)));
    }

    #[test]
    fn wait_if_times_out() {
        let w = Waiter::new();
        let ok = w.wait_if(|| true, Some(20));
        assert!(!ok);
    }

    #[test]
    fn notify_wakes_waiter() {
        let w = Arc::new(Waiter::new());
        let flag = Arc::new(StdAtomicBool::new(false));
        let w2 = w.clone();
        let flag2 = flag.clone();
        let handle = thread::spawn(move || {
            let ok = w2.wait_if(|| !flag2.load(Ordering::Acquire), Some(2000));
            assert!(ok);
        });
        thread::sleep(StdDuration::from_millis(20));
        flag.store(true, Ordering::Release);
        w.notify();
        handle.join().unwrap();
    }

    #[test]
    fn quit_waiting_unblocks_all() {
        let w = Arc::new(Waiter::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let w2 = w.clone();
            handles.push(thread::spawn(move || {
                assert!(w2.wait_if(|| true, None));
            }));
        }
        thread::sleep(StdDuration::from_millis(20));
        w.quit_waiting();
        for h in handles {
            h.join().unwrap();
        }
    }
}
