use std::collections::VecDeque;

/// Produces a monotonically non-decreasing DTS stream from a (possibly
/// reordered, due to B-frames) PTS stream.
///
/// Strategy: keep a short sliding window of recent PTS values and emit the
/// window minimum, then clamp against the last emitted DTS so the output
/// never goes backwards and never exceeds the incoming PTS. This satisfies
/// the contract without needing real B-frame reference info: non-decreasing,
/// `DTS <= PTS`, bounded lag behind PTS.
pub struct DtsEstimator {
    window: VecDeque<i64>,
    depth: usize,
    last_dts: Option<i64>,
}

impl DtsEstimator {
    /// `depth` is the re-order window size, e.g. 3 for up to 2 B-frames
    /// between references.
    pub fn new(depth: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(depth.max(1)),
            depth: depth.max(1),
            last_dts: None,
        }
    }

    pub fn push(&mut self, pts: i64) -> i64 {
        self.window.push_back(pts);
        while self.window.len() > self.depth {
            self.window.pop_front();
        }
        let candidate = *self.window.iter().min().unwrap();
        let candidate = candidate.min(pts);
        let dts = match self.last_dts {
            Some(prev) => candidate.max(prev),
            None => candidate,
        };
        let dts = dts.min(pts);
        self.last_dts = Some(dts);
        dts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_non_decreasing_under_reordering() {
        let mut est = DtsEstimator::new(3);
        let ptss = [0i64, 90_000, 270_000, 180_000, 360_000];
        let mut last = i64::MIN;
        for pts in ptss {
            let dts = est.push(pts);
            assert!(dts >= last, "dts {dts} went backwards from {last}");
            assert!(dts <= pts, "dts {dts} exceeded pts {pts}");
            last = dts;
        }
    }

    #[test]
    fn tracks_pts_with_bounded_lag() {
        let mut est = DtsEstimator::new(2);
        let mut last_dts = 0;
        for i in 0..20i64 {
            let pts = i * 90_000;
            last_dts = est.push(pts);
        }
        // with a constant, non-reordered input the lag should collapse to zero
        assert_eq!(last_dts, 19 * 90_000);
    }
}
