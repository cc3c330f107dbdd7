//! Out-of-band commands injected into a connection's event loop.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::CloseCode;

/// A request for the event loop, serviced in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the closing handshake, or tear down for abrupt codes.
    Close {
        /// Close code to send.
        code: CloseCode,
        /// Close reason to send.
        reason: String,
    },
    /// Run a notification dispatch pass.
    Dispatch,
}

impl Command {
    /// Lower is serviced first.
    pub const fn priority(&self) -> u8 {
        match self {
            Command::Close { .. } => 0,
            Command::Dispatch => 1,
        }
    }
}

#[derive(Debug)]
struct Entry {
    priority: u8,
    seq: u64,
    command: Command,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

/// Thread-safe priority queue whose consumer can await new entries.
///
/// Commands come out by priority, then in insertion order.
#[derive(Debug, Default)]
pub struct CommandQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
    notify: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command. Never blocks.
    pub fn push(&self, command: Command) {
        let entry = Entry {
            priority: command.priority(),
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            command,
        };
        self.heap.lock().push(Reverse(entry));
        self.notify.notify_one();
    }

    /// Dequeue the most urgent command, if any.
    pub fn try_pop(&self) -> Option<Command> {
        self.heap.lock().pop().map(|Reverse(entry)| entry.command)
    }

    /// Wait for the next command.
    ///
    /// Cancel safe: a command is only removed from the queue when this
    /// future returns it.
    pub async fn recv(&self) -> Command {
        loop {
            let notified = self.notify.notified();
            if let Some(command) = self.try_pop() {
                return command;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Drop every queued command.
    pub fn clear(&self) {
        self.heap.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn close(code: CloseCode) -> Command {
        Command::Close {
            code,
            reason: String::new(),
        }
    }

    #[test]
    fn test_close_before_dispatch() {
        let queue = CommandQueue::new();
        queue.push(Command::Dispatch);
        queue.push(close(CloseCode::GoingAway));
        queue.push(Command::Dispatch);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some(close(CloseCode::GoingAway)));
        assert_eq!(queue.try_pop(), Some(Command::Dispatch));
        assert_eq!(queue.try_pop(), Some(Command::Dispatch));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = CommandQueue::new();
        queue.push(close(CloseCode::Normal));
        queue.push(close(CloseCode::KillNow));
        queue.push(close(CloseCode::Restart));
        assert_eq!(queue.try_pop(), Some(close(CloseCode::Normal)));
        assert_eq!(queue.try_pop(), Some(close(CloseCode::KillNow)));
        assert_eq!(queue.try_pop(), Some(close(CloseCode::Restart)));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_thread() {
        let queue = Arc::new(CommandQueue::new());
        let producer = Arc::clone(&queue);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(Command::Dispatch);
        });
        let command = tokio::time::timeout(Duration::from_secs(5), queue.recv())
            .await
            .unwrap();
        assert_eq!(command, Command::Dispatch);
        thread.join().unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_recv_returns_already_queued() {
        let queue = CommandQueue::new();
        queue.push(Command::Dispatch);
        queue.push(close(CloseCode::TryLater));
        assert_eq!(queue.recv().await, close(CloseCode::TryLater));
        assert_eq!(queue.recv().await, Command::Dispatch);
    }

    #[test]
    fn test_clear() {
        let queue = CommandQueue::new();
        queue.push(Command::Dispatch);
        queue.clear();
        assert!(queue.is_empty());
    }
}
