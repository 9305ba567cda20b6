//! Blocking FIFO with task-completion bookkeeping.
//!
//! Every enqueued item bumps an *unfinished* counter which only drops once
//! a consumer calls [`TaskQueue::acknowledge`] for an item it dequeued.
//! [`TaskQueue::join`] waits for that counter to reach zero, so it cannot
//! return while an item sits between `dequeue` and `acknowledge`.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

struct State<T> {
    items: VecDeque<T>,
    unfinished: usize,
    in_flight: usize,
    closed: bool,
}

impl<T> State<T> {
    #[inline]
    fn check(&self) {
        debug_assert_eq!(self.unfinished, self.items.len() + self.in_flight);
    }
}

pub struct TaskQueue<T> {
    state: Mutex<State<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
    all_done: Condvar,
}

impl<T> TaskQueue<T> {
    /// Creates a queue that never blocks producers.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a queue holding at most `capacity` pending items.
    ///
    /// Producers block in [`TaskQueue::enqueue`] while the queue is full.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    pub(crate) fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                unfinished: 0,
                in_flight: 0,
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    /// Appends `item` to the tail, blocking while a bounded queue is full.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Error::QueueClosed);
            }
            match self.capacity {
                Some(cap) if state.items.len() >= cap => self.not_full.wait(&mut state),
                _ => break,
            }
        }

        state.items.push_back(item);
        state.unfinished += 1;
        state.check();
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the head item, blocking until one is available.
    ///
    /// Closing the queue does not wake consumers; shutting them down is
    /// the job of a sentinel item.
    pub fn dequeue(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.take_head(&mut state) {
                return item;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`TaskQueue::dequeue`], but gives up with [`Error::Empty`] once
    /// `timeout` elapses. The unfinished count is untouched on expiry.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = self.take_head(&mut state) {
                return Ok(item);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return self.take_head(&mut state).ok_or(Error::Empty);
            }
        }
    }

    fn take_head(&self, state: &mut State<T>) -> Option<T> {
        let item = state.items.pop_front()?;
        state.in_flight += 1;
        state.check();
        if self.capacity.is_some() {
            self.not_full.notify_one();
        }
        Some(item)
    }

    /// Marks one dequeued item as fully processed.
    ///
    /// Fails with [`Error::ProtocolViolation`] when no dequeued item is
    /// awaiting acknowledgment; the counters are left untouched.
    pub fn acknowledge(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.in_flight == 0 {
            return Err(Error::protocol(
                "acknowledge called without a matching dequeue",
            ));
        }

        state.in_flight -= 1;
        state.unfinished -= 1;
        state.check();

        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
        Ok(())
    }

    /// Blocks until every enqueued item has been acknowledged.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.all_done.wait(&mut state);
        }
    }

    /// Bounded [`TaskQueue::join`]. Returns `true` if the queue drained.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            if self.all_done.wait_until(&mut state, deadline).timed_out() {
                return state.unfinished == 0;
            }
        }
        true
    }

    /// Stops admitting new items. Producers blocked on a full queue wake
    /// up and fail with [`Error::QueueClosed`].
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let newly = !state.closed;
        state.closed = true;
        drop(state);

        self.not_full.notify_all();
        newly
    }

    /// Closes the queue and appends `tail` under the same lock, so no
    /// producer can slip an item in behind it. `tail` ignores the capacity
    /// bound.
    ///
    /// Returns how many items were appended; nothing is appended to a
    /// queue that was already closed.
    pub(crate) fn close_with<I>(&self, tail: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        state.closed = true;

        let before = state.items.len();
        state.items.extend(tail);
        let appended = state.items.len() - before;
        state.unfinished += appended;
        state.check();
        drop(state);

        self.not_full.notify_all();
        self.not_empty.notify_all();
        appended
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.items.len())
            .field("unfinished", &state.unfinished)
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::unbounded();
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }

        let drained: Vec<i32> = (0..5).map(|_| queue.dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.in_flight(), 5);
        assert_eq!(queue.unfinished(), 5);
    }

    #[test]
    fn test_enqueue_after_close() {
        let queue = TaskQueue::unbounded();
        queue.enqueue(1).unwrap();
        assert!(queue.close());
        assert!(!queue.close());

        assert!(matches!(queue.enqueue(2), Err(Error::QueueClosed)));
        // already admitted items are still served
        assert_eq!(queue.dequeue(), 1);
    }

    #[test]
    fn test_acknowledge_without_dequeue() {
        let queue: TaskQueue<u8> = TaskQueue::unbounded();
        assert!(matches!(queue.acknowledge(), Err(Error::ProtocolViolation(_))));

        queue.enqueue(7).unwrap();
        // enqueued but not dequeued: still a violation
        assert!(matches!(queue.acknowledge(), Err(Error::ProtocolViolation(_))));
        assert_eq!(queue.unfinished(), 1);

        queue.dequeue();
        queue.acknowledge().unwrap();
        assert_eq!(queue.unfinished(), 0);
        assert!(queue.acknowledge().is_err());
    }

    #[test]
    fn test_dequeue_timeout_leaves_count() {
        let queue: TaskQueue<u8> = TaskQueue::unbounded();
        let res = queue.dequeue_timeout(Duration::from_millis(20));
        assert!(matches!(res, Err(Error::Empty)));
        assert_eq!(queue.unfinished(), 0);
        assert_eq!(queue.in_flight(), 0);

        queue.enqueue(3).unwrap();
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(20)).unwrap(), 3);
    }

    #[test]
    fn test_join_waits_for_acknowledge() {
        let queue = Arc::new(TaskQueue::unbounded());
        queue.enqueue(()).unwrap();
        queue.dequeue();

        let joined = Arc::new(AtomicBool::new(false));
        let waiter = {
            let queue = queue.clone();
            let joined = joined.clone();
            thread::spawn(move || {
                queue.join();
                joined.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!joined.load(Ordering::SeqCst));

        queue.acknowledge().unwrap();
        waiter.join().unwrap();
        assert!(joined.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_on_empty_queue_returns() {
        let queue: TaskQueue<u8> = TaskQueue::unbounded();
        queue.join();
        assert!(queue.join_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_join_timeout_expires() {
        let queue = TaskQueue::unbounded();
        queue.enqueue(1).unwrap();
        assert!(!queue.join_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_bounded_blocks_producer() {
        let queue = Arc::new(TaskQueue::bounded(1));
        queue.enqueue(1).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                queue.enqueue(2).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));

        assert_eq!(queue.dequeue(), 1);
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(TaskQueue::bounded(1));
        queue.enqueue(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(2))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        let res = producer.join().unwrap();
        assert!(matches!(res, Err(Error::QueueClosed)));
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn test_close_with_appends_tail_last() {
        let queue = TaskQueue::bounded(2);
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        // tail ignores the bound
        assert_eq!(queue.close_with([0, 0, 0]), 3);
        assert!(queue.is_closed());
        assert_eq!(queue.unfinished(), 5);
        assert!(matches!(queue.enqueue(9), Err(Error::QueueClosed)));

        let drained: Vec<i32> = (0..5).map(|_| queue.dequeue()).collect();
        assert_eq!(drained, vec![1, 2, 0, 0, 0]);

        assert_eq!(queue.close_with([7]), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_with_races_producers() {
        let queue = Arc::new(TaskQueue::unbounded());
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut accepted = 0;
                    while queue.enqueue(1).is_ok() {
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(5));
        queue.close_with([0, 0]);
        let accepted: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();

        let items: Vec<i32> = (0..queue.len()).map(|_| queue.dequeue()).collect();
        assert_eq!(items.len(), accepted + 2);
        assert_eq!(&items[accepted..], &[0, 0]);
    }
}
