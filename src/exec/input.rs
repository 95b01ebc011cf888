//! Stdin delivery for the interpreter thread.
//!
//! `send` pushes characters into an `InputQueue`. The interpreter pulls them
//! one at a time through an `InputReader`, chosen once per session:
//!
//! - `BlockingReader` (a `SharedFlag` was supplied at init): an empty queue
//!   parks the interpreter thread on the flag. After one wake the flag is
//!   reset and the queue retried; still empty means end of input.
//! - `NonBlockingReader` (no flag): an empty queue is reported immediately.
//!
//! Queue pushes and the flag set happen under the queue lock, and the reader
//! resets the flag under the same lock when it drains the queue. A wake
//! therefore always corresponds to input the reader has not yet seen.

use crate::exec::flag::{SharedFlag, WakeReason};
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of one stdin read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinRead {
    Char(char),
    /// Woken with nothing queued: end of input, not an error
    Exhausted,
    /// Nothing queued and no way to wait for more
    Unavailable,
}

/// Pending input characters, in send order
#[derive(Debug, Default)]
pub struct InputQueue {
    chars: Mutex<VecDeque<char>>,
    flag: OnceCell<SharedFlag>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<char>> {
        self.chars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the session's flag. Only the first call has an effect.
    pub fn attach_flag(&self, flag: SharedFlag) -> bool {
        self.flag.set(flag).is_ok()
    }

    pub fn flag(&self) -> Option<&SharedFlag> {
        self.flag.get()
    }

    /// Append every character of `text` and signal one waiter
    pub fn push_text(&self, text: &str) {
        let mut chars = self.lock();
        chars.extend(text.chars());
        if let Some(flag) = self.flag.get() {
            flag.set_and_notify_one();
        }
    }

    /// End of input: queued characters are still delivered, then blocking
    /// reads stop waiting
    pub fn close(&self) {
        let _chars = self.lock();
        if let Some(flag) = self.flag.get() {
            flag.release();
        }
    }

    pub fn pop(&self) -> Option<char> {
        let mut chars = self.lock();
        let next = chars.pop_front();
        if chars.is_empty() {
            if let Some(flag) = self.flag.get() {
                flag.reset();
            }
        }
        next
    }

    /// Put a character back at the front
    pub fn unread(&self, c: char) {
        self.lock().push_front(c);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Character source handed to an interpreter
pub trait InputReader: Send + Sync {
    fn read_char(&self) -> StdinRead;

    /// Return a character that was read but not consumed
    fn unread(&self, c: char);

    /// Wake a blocked `read_char`; reads return without waiting until `resume`
    fn interrupt(&self);

    fn resume(&self);
}

pub struct BlockingReader {
    queue: Arc<InputQueue>,
    flag: SharedFlag,
    interrupted: AtomicBool,
}

impl BlockingReader {
    pub fn new(queue: Arc<InputQueue>, flag: SharedFlag) -> Self {
        Self {
            queue,
            flag,
            interrupted: AtomicBool::new(false),
        }
    }
}

impl InputReader for BlockingReader {
    fn read_char(&self) -> StdinRead {
        if let Some(c) = self.queue.pop() {
            return StdinRead::Char(c);
        }

        log::debug!("worker: waiting for input via shared flag");
        match self.flag.wait(&self.interrupted) {
            WakeReason::Signalled => {
                self.flag.reset();
                match self.queue.pop() {
                    Some(c) => StdinRead::Char(c),
                    None => StdinRead::Exhausted,
                }
            }
            // Input closed: whatever was queued before the close still counts
            WakeReason::Released => match self.queue.pop() {
                Some(c) => StdinRead::Char(c),
                None => StdinRead::Exhausted,
            },
            WakeReason::Aborted => StdinRead::Unavailable,
        }
    }

    fn unread(&self, c: char) {
        self.queue.unread(c);
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.flag.wake_all();
    }

    fn resume(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

pub struct NonBlockingReader {
    queue: Arc<InputQueue>,
}

impl NonBlockingReader {
    pub fn new(queue: Arc<InputQueue>) -> Self {
        Self { queue }
    }
}

impl InputReader for NonBlockingReader {
    fn read_char(&self) -> StdinRead {
        match self.queue.pop() {
            Some(c) => StdinRead::Char(c),
            None => StdinRead::Unavailable,
        }
    }

    fn unread(&self, c: char) {
        self.queue.unread(c);
    }

    fn interrupt(&self) {}

    fn resume(&self) {}
}

/// Pick the reader for a session, once, from whether a flag was supplied
pub fn select_reader(
    queue: Arc<InputQueue>,
    flag: Option<SharedFlag>,
) -> Arc<dyn InputReader> {
    match flag {
        Some(flag) => {
            queue.attach_flag(flag.clone());
            Arc::new(BlockingReader::new(queue, flag))
        }
        None => Arc::new(NonBlockingReader::new(queue)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_non_blocking_reports_unavailable() {
        let queue = Arc::new(InputQueue::new());
        let reader = select_reader(queue.clone(), None);
        assert_eq!(reader.read_char(), StdinRead::Unavailable);
        queue.push_text("ab");
        assert_eq!(reader.read_char(), StdinRead::Char('a'));
        assert_eq!(reader.read_char(), StdinRead::Char('b'));
        assert_eq!(reader.read_char(), StdinRead::Unavailable);
    }

    #[test]
    fn test_blocking_reader_waits_for_send() {
        let queue = Arc::new(InputQueue::new());
        let reader = select_reader(queue.clone(), Some(SharedFlag::new()));

        let handle = thread::spawn(move || (reader.read_char(), reader.read_char()));
        thread::sleep(Duration::from_millis(30));
        queue.push_text("xy");
        assert_eq!(
            handle.join().unwrap(),
            (StdinRead::Char('x'), StdinRead::Char('y'))
        );
    }

    #[test]
    fn test_blocking_reader_exhausted_after_release() {
        let queue = Arc::new(InputQueue::new());
        let flag = SharedFlag::new();
        let reader = select_reader(queue, Some(flag.clone()));
        let handle = thread::spawn(move || reader.read_char());
        thread::sleep(Duration::from_millis(20));
        flag.release();
        assert_eq!(handle.join().unwrap(), StdinRead::Exhausted);
    }

    #[test]
    fn test_close_delivers_queued_input_first() {
        let queue = Arc::new(InputQueue::new());
        let reader = select_reader(queue.clone(), Some(SharedFlag::new()));
        let handle = thread::spawn(move || {
            let first = reader.read_char();
            (first, reader.read_char(), reader.read_char())
        });
        thread::sleep(Duration::from_millis(20));
        queue.push_text("k");
        queue.close();
        assert_eq!(
            handle.join().unwrap(),
            (StdinRead::Char('k'), StdinRead::Exhausted, StdinRead::Exhausted)
        );
    }

    #[test]
    fn test_drained_queue_clears_flag() {
        let queue = Arc::new(InputQueue::new());
        let flag = SharedFlag::new();
        let reader = select_reader(queue.clone(), Some(flag.clone()));
        queue.push_text("q");
        assert!(flag.is_set());
        assert_eq!(reader.read_char(), StdinRead::Char('q'));
        assert!(!flag.is_set());
    }

    #[test]
    fn test_interrupt_and_unread() {
        let queue = Arc::new(InputQueue::new());
        let reader = select_reader(queue.clone(), Some(SharedFlag::new()));
        reader.interrupt();
        assert_eq!(reader.read_char(), StdinRead::Unavailable);
        reader.resume();

        reader.unread('z');
        assert_eq!(queue.len(), 1);
        assert_eq!(reader.read_char(), StdinRead::Char('z'));
    }
}
