use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// One RTP payload handed from the frame callback to the writer.
#[derive(Debug, Clone)]
pub struct RtpRecord {
    pub track_id: u8,
    pub payload: Vec<u8>,
}

/// Bounded single-producer/single-consumer queue of [`RtpRecord`]s.
///
/// `push` never blocks: on overflow the oldest unread record is dropped so
/// the writer always catches up on the freshest media. The writer is a
/// blocking `std::thread`, not a tokio task, so `pull` parks on a
/// [`Condvar`] rather than an async notify.
pub struct Ring {
    queue: Mutex<VecDeque<RtpRecord>>,
    not_empty: Condvar,
    capacity: usize,
    closed: AtomicBool,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Wait-free on success. Drops the oldest record if the ring is full.
    pub fn push(&self, record: RtpRecord) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(record);
        self.not_empty.notify_one();
    }

    /// Blocks until a record is available or the ring is closed (returns
    /// `None`). Once closed and drained, every subsequent call returns `None`
    /// immediately.
    pub fn pull(&self) -> Option<RtpRecord> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if let Some(record) = queue.pop_front() {
                return Some(record);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            queue = self.not_empty.wait(queue).unwrap();
        }
    }

    /// Unblocks any in-progress or future `pull` with a terminal `None`.
    pub fn close(&self) {
        let _queue = self.queue.lock().unwrap();
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn push_then_pull_returns_in_order() {
        let ring = Ring::new(4);
        ring.push(RtpRecord { track_id: 0, payload: vec![1] });
        ring.push(RtpRecord { track_id: 0, payload: vec![2] });
        assert_eq!(ring.pull().unwrap().payload, vec![1]);
        assert_eq!(ring.pull().unwrap().payload, vec![2]);
    }

    #[test]
    fn overflow_drops_oldest() {
        let ring = Ring::new(2);
        ring.push(RtpRecord { track_id: 0, payload: vec![1] });
        ring.push(RtpRecord { track_id: 0, payload: vec![2] });
        ring.push(RtpRecord { track_id: 0, payload: vec![3] });
        assert_eq!(ring.pull().unwrap().payload, vec![2]);
        assert_eq!(ring.pull().unwrap().payload, vec![3]);
    }

    #[test]
    fn close_unblocks_pending_pull() {
        let ring = Arc::new(Ring::new(4));
        let r2 = ring.clone();
        let handle = std::thread::spawn(move || r2.pull());
        std::thread::sleep(Duration::from_millis(20));
        ring.close();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn pull_after_close_drains_then_returns_none() {
        let ring = Ring::new(4);
        ring.push(RtpRecord { track_id: 0, payload: vec![9] });
        ring.close();
        assert_eq!(ring.pull().unwrap().payload, vec![9]);
        assert!(ring.pull().is_none());
        assert!(ring.is_closed());
    }
}
