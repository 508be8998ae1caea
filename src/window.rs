use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::segment::Segment;

/// The sliding window of live segments for one client, ordered oldest-first.
///
/// `Arc` ownership is what makes eviction safe under concurrent readers: a
/// [`SegmentReader`](crate::segment::SegmentReader) holds its own clone, so
/// dropping a segment from `queue`/`by_name` only removes it from *this*
/// index, not from memory.
pub struct Window {
    queue: VecDeque<Arc<Segment>>,
    by_name: HashMap<String, Arc<Segment>>,
    capacity: usize,
    deleted_count: u64,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            by_name: HashMap::new(),
            capacity,
            deleted_count: 0,
        }
    }

    /// Appends a new segment, evicting the oldest if the window is now over
    /// capacity. Eviction only removes index visibility; the `Arc` itself may
    /// still be kept alive by readers.
    pub fn append(&mut self, segment: Arc<Segment>) {
        self.by_name.insert(segment.name().to_string(), segment.clone());
        self.queue.push_back(segment);
        while self.queue.len() > self.capacity {
            if let Some(evicted) = self.queue.pop_front() {
                self.by_name.remove(evicted.name());
                self.deleted_count += 1;
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Segment>> {
        self.by_name.get(name).cloned()
    }

    /// Names in oldest-first order, plus the current `deleted_count`, for
    /// playlist rendering.
    pub fn snapshot(&self) -> (Vec<String>, u64) {
        let names = self.queue.iter().map(|s| s.name().to_string()).collect();
        (names, self.deleted_count)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn current(&self) -> Option<Arc<Segment>> {
        self.queue.back().cloned()
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg() -> Arc<Segment> {
        Arc::new(Segment::new(Some(0), None))
    }

    #[test]
    fn append_respects_capacity_and_evicts_oldest() {
        let mut w = Window::new(2);
        let a = seg();
        let b = seg();
        let c = seg();
        let (a_name, b_name, c_name) = (a.name().to_string(), b.name().to_string(), c.name().to_string());
        w.append(a);
        w.append(b);
        w.append(c);
        assert_eq!(w.snapshot().0, vec![b_name.clone(), c_name.clone()]);
        assert!(w.lookup(&a_name).is_none());
        assert!(w.lookup(&b_name).is_some());
        assert_eq!(w.deleted_count(), 1);
    }

    #[test]
    fn evicted_segment_stays_alive_while_a_reader_holds_it() {
        let mut w = Window::new(1);
        let a = seg();
        let reader_name = a.name().to_string();
        let mut reader = a.new_reader();
        w.append(a);
        let b = seg();
        w.append(b);
        assert!(w.lookup(&reader_name).is_none());
        // still readable: the reader's own Arc kept it alive
        let _ = reader.read_to_end();
    }

    #[test]
    fn deleted_count_is_monotonic() {
        let mut w = Window::new(1);
        for _ in 0..5 {
            w.append(seg());
        }
        assert_eq!(w.deleted_count(), 4);
    }

    #[test]
    fn empty_window_reports_empty_and_no_current() {
        let w = Window::new(3);
        assert!(w.is_empty());
        assert!(w.current().is_none());
    }
}
