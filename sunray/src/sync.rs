//! The two primitives every worker thread communicates through: a
//! latest-value event slot and a bounded packet queue. Stopping them is
//! how session teardown cancels its threads: the queue wakes all blocked
//! waiters, the event slot rejects further raises.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct EventState<T> {
    value: Option<T>,
    stopped: bool,
}

/// A single-value slot where the newest raise wins.
///
/// Raising while a value is already pending replaces it; consumers that
/// only care about the latest state (keyframe requests, loss reports)
/// never see a backlog. The consumer polls with `take` between frames,
/// so nothing ever blocks on the slot.
pub struct Event<T> {
    state: Mutex<EventState<T>>,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Event::new()
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Event {
            state: Mutex::new(EventState { value: None, stopped: false }),
        }
    }

    /// Replaces any pending value.
    pub fn raise(&self, value: T) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.value = Some(value);
    }

    /// Raises the value computed from whatever is currently pending, under
    /// the slot lock. Lets concurrent raisers combine instead of clobber.
    pub fn raise_with(&self, combine: impl FnOnce(Option<T>) -> T) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        let pending = state.value.take();
        state.value = Some(combine(pending));
    }

    /// Takes the pending value without blocking.
    pub fn take(&self) -> Option<T> {
        self.state.lock().value.take()
    }

    /// Makes all future raises no-ops.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
    }
}

struct QueueState<T> {
    items: std::collections::VecDeque<T>,
    stopped: bool,
}

/// A bounded FIFO connecting a pump thread to a transmit thread.
///
/// `push` blocks while the queue is full, so a slow network leg applies
/// backpressure to capture instead of growing an unbounded backlog.
pub struct PacketQueue<T> {
    state: Mutex<QueueState<T>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl<T> PacketQueue<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Arc::new(PacketQueue {
            state: Mutex::new(QueueState {
                items: std::collections::VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        })
    }

    /// Blocks until space is available. Returns the item back if the queue
    /// stops first, so callers can log what was lost.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        while state.items.len() == self.capacity {
            if state.stopped {
                return Err(item);
            }
            self.writable.wait(&mut state);
        }
        if state.stopped {
            return Err(item);
        }
        state.items.push_back(item);
        self.readable.notify_one();
        Ok(())
    }

    /// Blocks until an item arrives, the timeout lapses, or the queue is
    /// stopped. A stopped queue still drains: pending items are returned
    /// before `None`.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.writable.notify_one();
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            if self.readable.wait_for(&mut state, timeout).timed_out() {
                let item = state.items.pop_front();
                if item.is_some() {
                    self.writable.notify_one();
                }
                return item;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Wakes all blocked producers and consumers. Items already queued
    /// remain poppable.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn event_latest_value_wins() {
        let event = Event::new();
        event.raise(1u32);
        event.raise(2);
        event.raise(3);
        assert_eq!(event.take(), Some(3));
        assert_eq!(event.take(), None);
    }

    #[test]
    fn event_raise_with_sees_pending_value() {
        let event = Event::new();
        event.raise(10u32);
        event.raise_with(|pending| pending.unwrap_or(0) + 5);
        assert_eq!(event.take(), Some(15));
        event.raise_with(|pending| pending.unwrap_or(0) + 5);
        assert_eq!(event.take(), Some(5));
    }

    #[test]
    fn event_stop_rejects_later_raises() {
        let event: Event<u8> = Event::new();
        event.raise(7);
        event.stop();
        event.raise(8);
        assert_eq!(event.take(), Some(7), "a pending value survives the stop");
        assert_eq!(event.take(), None);
    }

    #[test]
    fn queue_orders_fifo() {
        let queue = PacketQueue::new(4);
        for i in 0..4u32 {
            queue.push(i).unwrap();
        }
        for i in 0..4u32 {
            assert_eq!(queue.pop(Duration::from_millis(10)), Some(i));
        }
        assert_eq!(queue.pop(Duration::from_millis(10)), None);
    }

    #[test]
    fn queue_full_push_blocks_until_pop() {
        let queue = PacketQueue::new(1);
        queue.push(1u32).unwrap();
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || producer.push(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pop(Duration::from_millis(10)), Some(1));
        handle.join().unwrap().unwrap();
        assert_eq!(queue.pop(Duration::from_millis(10)), Some(2));
    }

    #[test]
    fn queue_stop_unblocks_producer_with_item() {
        let queue = PacketQueue::new(1);
        queue.push(1u32).unwrap();
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || producer.push(2));
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert_eq!(handle.join().unwrap(), Err(2));
    }

    #[test]
    fn queue_drains_after_stop() {
        let queue = PacketQueue::new(4);
        queue.push(10u32).unwrap();
        queue.push(11).unwrap();
        queue.stop();
        assert_eq!(queue.pop(Duration::from_millis(10)), Some(10));
        assert_eq!(queue.pop(Duration::from_millis(10)), Some(11));
        assert_eq!(queue.pop(Duration::from_millis(10)), None);
    }
}
