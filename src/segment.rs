use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;
use uuid::Uuid;

use crate::tsmux::TsMuxer;

/// A single MPEG-TS segment: an append-only byte buffer plus the bookkeeping
/// the window and playlist renderer need.
///
/// Multiple [`SegmentReader`]s may read concurrently with the writer
/// appending; all mutation happens under `inner`'s lock so a reader never
/// observes a torn write — it either sees the buffer before or after an
/// append, never a partial one.
pub struct Segment {
    name: String,
    inner: Mutex<SegmentInner>,
    closed: AtomicBool,
    video_track: Option<u8>,
    audio_track: Option<u8>,
}

struct SegmentInner {
    mux: TsMuxer,
    first_written: bool,
    first_written_at: Option<Instant>,
}

impl Segment {
    pub fn new(video_track: Option<u8>, audio_track: Option<u8>) -> Self {
        Self {
            name: Uuid::new_v4().simple().to_string(),
            inner: Mutex::new(SegmentInner {
                mux: TsMuxer::new(video_track.is_some(), audio_track.is_some()),
                first_written: false,
                first_written_at: None,
            }),
            closed: AtomicBool::new(false),
            video_track,
            audio_track,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn video_track(&self) -> Option<u8> {
        self.video_track
    }

    pub fn audio_track(&self) -> Option<u8> {
        self.audio_track
    }

    pub fn first_written(&self) -> bool {
        self.inner.lock().unwrap().first_written
    }

    /// Seconds elapsed since the first access unit was written, or `None` if
    /// nothing has been written yet.
    pub fn elapsed_since_first_write(&self, now: Instant) -> Option<f64> {
        self.inner
            .lock()
            .unwrap()
            .first_written_at
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
    }

    pub fn set_pcr(&self, elapsed: std::time::Duration) {
        self.inner.lock().unwrap().mux.set_pcr(elapsed);
    }

    /// Appends one H.264 access unit (already SPS/PPS-prefixed if needed).
    pub fn write_h264(&self, dts: i64, pts: i64, is_idr: bool, nalus: &[Vec<u8>]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.mux.write_h264(dts, pts, is_idr, nalus)?;
        if !inner.first_written {
            inner.first_written = true;
            inner.first_written_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Appends one AAC access unit.
    pub fn write_aac(&self, sample_rate: u32, channels: u8, pts: i64, au: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.mux.write_aac(sample_rate, channels, pts, au)?;
        if !inner.first_written {
            inner.first_written = true;
            inner.first_written_at = Some(Instant::now());
        }
        Ok(())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Independent snapshot-on-read view over this segment's bytes.
    pub fn new_reader(self: &std::sync::Arc<Self>) -> SegmentReader {
        SegmentReader {
            segment: self.clone(),
            pos: 0,
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().mux.len()
    }

    fn read_at(&self, pos: usize, buf: &mut [u8]) -> usize {
        self.inner.lock().unwrap().mux.read_at(pos, buf)
    }
}

/// A reader over a segment's buffer. Holds its own `Arc<Segment>` reference,
/// so it remains valid even after the segment has been evicted from the
/// window's index.
pub struct SegmentReader {
    segment: std::sync::Arc<Segment>,
    pos: usize,
}

impl SegmentReader {
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.segment.read_at(self.pos, buf);
        self.pos += n;
        n
    }

    pub fn remaining(&self) -> usize {
        self.segment.len().saturating_sub(self.pos)
    }

    /// Reads everything currently available (and, if the segment is closed,
    /// the whole remainder) into an owned buffer.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = vec![0u8; self.remaining()];
        let n = self.read(&mut out);
        out.truncate(n);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_segment_has_unique_name_and_is_not_written() {
        let a = Segment::new(Some(0), None);
        let b = Segment::new(Some(0), None);
        assert_ne!(a.name(), b.name());
        assert!(!a.first_written());
    }

    #[test]
    fn first_write_sets_first_written() {
        let seg = Segment::new(Some(0), None);
        seg.write_h264(0, 2_000_000_000, true, &[vec![0x65, 1, 2, 3]])
            .unwrap();
        assert!(seg.first_written());
    }

    #[test]
    fn reader_sees_prefix_of_final_bytes() {
        let seg = std::sync::Arc::new(Segment::new(Some(0), None));
        seg.write_h264(0, 2_000_000_000, true, &[vec![0x65, 1, 2, 3]])
            .unwrap();
        let mut r1 = seg.new_reader();
        let snap1 = r1.read_to_end();
        seg.write_h264(90_000, 2_090_000_000, false, &[vec![0x61, 4, 5]])
            .unwrap();
        let mut r2 = seg.new_reader();
        let snap2 = r2.read_to_end();
        assert!(snap2.len() >= snap1.len());
        assert_eq!(&snap2[..snap1.len()], &snap1[..]);
    }

    #[test]
    fn evicted_segment_remains_readable_through_held_arc() {
        let seg = std::sync::Arc::new(Segment::new(Some(0), None));
        seg.write_h264(0, 2_000_000_000, true, &[vec![0x65]]).unwrap();
        let mut reader = seg.new_reader();
        drop(seg);
        assert!(reader.remaining() > 0);
        let _ = reader.read_to_end();
    }
}
