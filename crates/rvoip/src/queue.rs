//! The JSON command FIFO and JSON event FIFO of spec §3: "guarded by
//! independent mutexes; the event queue has a condition variable for
//! waiters." Only [`EventQueue::wait_for`] blocks (spec §5: "Only the
//! command thread's `wait_for_event` blocks on a condition variable with
//! timeout. No other core path blocks indefinitely").

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::wire::{Command, Event};

/// FIFO of commands waiting to be dispatched. Plain mutex: nothing waits on
/// this queue being non-empty — the command thread drains it in a loop.
#[derive(Default)]
pub struct CommandQueue {
    items: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        self.items.lock().push_back(command);
    }

    pub fn pop(&self) -> Option<Command> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO of events waiting to be delivered to `wait_for_event` callers.
#[derive(Default)]
pub struct EventQueue {
    items: Mutex<VecDeque<Event>>,
    ready: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        let mut items = self.items.lock();
        items.push_back(event);
        self.ready.notify_one();
    }

    /// Non-blocking pop, used by callers that poll rather than wait.
    pub fn try_pop(&self) -> Option<Event> {
        self.items.lock().pop_front()
    }

    /// Blocks up to `timeout` for an event to arrive, or returns one
    /// immediately if the queue is already non-empty (spec §4.7
    /// `wait_for_event(timeout_ms)`).
    pub fn wait_for(&self, timeout: Duration) -> Option<Event> {
        let mut items = self.items.lock();
        if let Some(event) = items.pop_front() {
            return Some(event);
        }
        let result = self.ready.wait_for(&mut items, timeout);
        if result.timed_out() {
            return None;
        }
        items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_for_returns_immediately_if_already_queued() {
        let queue = EventQueue::new();
        queue.push(Event::new("log"));
        let got = queue.wait_for(Duration::from_millis(50));
        assert_eq!(got.unwrap().name, "log");
    }

    #[test]
    fn wait_for_times_out_with_no_event() {
        let queue = EventQueue::new();
        let got = queue.wait_for(Duration::from_millis(20));
        assert!(got.is_none());
    }

    #[test]
    fn wait_for_wakes_on_a_push_from_another_thread() {
        let queue = Arc::new(EventQueue::new());
        let pusher = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pusher.push(Event::new("ua_start"));
        });
        let got = queue.wait_for(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(got.unwrap().name, "ua_start");
    }

    #[test]
    fn command_queue_is_fifo() {
        let queue = CommandQueue::new();
        queue.push(Command { name: "a".into(), fields: Default::default(), fingerprint: None });
        queue.push(Command { name: "b".into(), fields: Default::default(), fingerprint: None });
        assert_eq!(queue.pop().unwrap().name, "a");
        assert_eq!(queue.pop().unwrap().name, "b");
        assert!(queue.pop().is_none());
    }
}
