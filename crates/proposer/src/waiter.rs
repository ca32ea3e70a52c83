//! Condvar-based waiter for the proposer loop.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Level-triggered wakeup: `wake` calls are not lost even when nobody
/// is waiting yet, and shutdown just wakes everyone after flipping its
/// own flag.
#[derive(Default)]
pub struct Waiter {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until woken or the timeout elapses.
    pub fn wait_up_to(&self, timeout: Duration) {
        let mut woken = self.woken.lock();
        if !*woken {
            self.condvar.wait_for(&mut woken, timeout);
        }
        *woken = false;
    }

    pub fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_timeout_elapses() {
        let waiter = Waiter::new();
        let start = Instant::now();
        waiter.wait_up_to(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wake_is_not_lost() {
        let waiter = Waiter::new();
        waiter.wake();
        let start = Instant::now();
        // Returns immediately because the wake is pending.
        waiter.wait_up_to(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wake_from_other_thread() {
        let waiter = Arc::new(Waiter::new());
        let waker = waiter.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            waker.wake();
        });
        let start = Instant::now();
        waiter.wait_up_to(Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }
}
