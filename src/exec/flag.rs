//! One-slot wake flag shared between the host side and the interpreter thread.
//!
//! The host sets the flag after queueing input; the interpreter thread parks
//! on it while the queue is empty. `release` is the teardown path: it wakes
//! every parked thread and keeps them from ever parking again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct FlagCell {
    set: bool,
    released: bool,
}

/// How a wait on the flag ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The flag was set
    Signalled,
    /// Teardown released the flag
    Released,
    /// The caller's abort condition became true
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct SharedFlag {
    inner: Arc<(Mutex<FlagCell>, Condvar)>,
}

impl SharedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self) -> MutexGuard<'_, FlagCell> {
        // The cell holds two bools; a panicking holder cannot leave it torn
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the flag and wake at most one parked waiter
    pub fn set_and_notify_one(&self) {
        let mut cell = self.cell();
        cell.set = true;
        self.inner.1.notify_one();
    }

    pub fn reset(&self) {
        self.cell().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.cell().set
    }

    /// Wake every waiter without setting the flag, so they re-check `abort`
    pub fn wake_all(&self) {
        let _cell = self.cell();
        self.inner.1.notify_all();
    }

    /// Park until the flag is set, the flag is released, or `abort` is true.
    /// Returns immediately when any of those already holds.
    pub fn wait(&self, abort: &AtomicBool) -> WakeReason {
        let mut cell = self.cell();
        loop {
            if cell.released {
                return WakeReason::Released;
            }
            if cell.set {
                return WakeReason::Signalled;
            }
            if abort.load(Ordering::SeqCst) {
                return WakeReason::Aborted;
            }
            cell = self
                .inner
                .1
                .wait(cell)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Permanently wake all waiters. Used on teardown and at end of input.
    pub fn release(&self) {
        let mut cell = self.cell();
        cell.released = true;
        self.inner.1.notify_all();
    }

    pub fn is_released(&self) -> bool {
        self.cell().released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_when_already_set() {
        let flag = SharedFlag::new();
        flag.set_and_notify_one();
        let abort = AtomicBool::new(false);
        assert_eq!(flag.wait(&abort), WakeReason::Signalled);
        flag.reset();
        assert!(!flag.is_set());
    }

    #[test]
    fn test_set_wakes_parked_thread() {
        let flag = SharedFlag::new();
        let waiter = flag.clone();
        let handle = thread::spawn(move || waiter.wait(&AtomicBool::new(false)));
        thread::sleep(Duration::from_millis(20));
        flag.set_and_notify_one();
        assert_eq!(handle.join().unwrap(), WakeReason::Signalled);
    }

    #[test]
    fn test_release_wakes_all_permanently() {
        let flag = SharedFlag::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let waiter = flag.clone();
                thread::spawn(move || waiter.wait(&AtomicBool::new(false)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        flag.release();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), WakeReason::Released);
        }
        assert_eq!(flag.wait(&AtomicBool::new(false)), WakeReason::Released);
    }

    #[test]
    fn test_abort_wakes_waiter() {
        let flag = SharedFlag::new();
        let abort = Arc::new(AtomicBool::new(false));
        let (waiter, waiter_abort) = (flag.clone(), abort.clone());
        let handle = thread::spawn(move || waiter.wait(&waiter_abort));
        thread::sleep(Duration::from_millis(20));
        abort.store(true, Ordering::SeqCst);
        flag.wake_all();
        assert_eq!(handle.join().unwrap(), WakeReason::Aborted);
    }
}
