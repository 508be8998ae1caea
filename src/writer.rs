use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use log::{error, warn};

use crate::depacketize::{h264, AacDepacketizer, DepacketizeOutcome, H264Depacketizer};
use crate::pathmgr::PathTracks;
use crate::ring::Ring;
use crate::segment::Segment;
use crate::window::Window;

const VIDEO_CLOCK_RATE: u32 = 90_000;
const PTS_OFFSET_90K: i64 = 2 * VIDEO_CLOCK_RATE as i64;

/// Handle to a running writer thread.
pub struct WriterHandle {
    join: std::thread::JoinHandle<Result<()>>,
    stopped: Arc<AtomicBool>,
}

impl WriterHandle {
    /// Blocks until the writer thread exits (after the ring is closed or a
    /// fatal error occurs) and returns its result.
    pub fn join(self) -> Result<()> {
        self.join.join().unwrap_or_else(|_| bail!("writer thread panicked"))
    }

    pub fn has_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Spawns the segmenter/writer on a dedicated OS thread: it performs
/// blocking `ring.pull()` and synchronous TS writes, so it is not a tokio
/// task (matching the teacher's per-connection `std::thread::Builder`
/// pattern used for its own blocking ingress readers).
pub fn spawn(
    ring: Arc<Ring>,
    window: Arc<Mutex<Window>>,
    tracks: PathTracks,
    hls_segment_count: usize,
    hls_segment_duration: Duration,
    segment_min_au_count: usize,
) -> Result<WriterHandle> {
    let stopped = Arc::new(AtomicBool::new(false));
    let stopped_clone = stopped.clone();
    let join = std::thread::Builder::new()
        .name("hls-writer".to_string())
        .spawn(move || {
            let result = run(ring, window, tracks, hls_segment_count, hls_segment_duration, segment_min_au_count);
            stopped_clone.store(true, Ordering::Release);
            if let Err(e) = &result {
                error!("writer exiting with fatal error: {e:#}");
            }
            result
        })?;
    Ok(WriterHandle { join, stopped })
}

struct TrackState {
    h264: H264Depacketizer,
    aac: AacDepacketizer,
    au_buf: Vec<Vec<u8>>,
    au_has_idr: bool,
    au_base_rtp_ts: Option<u32>,
    video_base_ts: Option<u32>,
    audio_base_ts: Option<u32>,
    audio_au_index: u64,
    audio_au_count_in_segment: usize,
}

fn run(
    ring: Arc<Ring>,
    window: Arc<Mutex<Window>>,
    tracks: PathTracks,
    hls_segment_count: usize,
    hls_segment_duration: Duration,
    segment_min_au_count: usize,
) -> Result<()> {
    if !tracks.has_any_track() {
        bail!("unable to find a video or audio track");
    }

    let mut state = TrackState {
        h264: H264Depacketizer::new(),
        aac: AacDepacketizer::new(13),
        au_buf: Vec::new(),
        au_has_idr: false,
        au_base_rtp_ts: None,
        video_base_ts: None,
        audio_base_ts: None,
        audio_au_index: 0,
        audio_au_count_in_segment: 0,
    };

    let start_pcr = Instant::now();
    let mut current: Option<Arc<Segment>> = None;
    let mut dts_estimator = crate::dts::DtsEstimator::new(3);

    loop {
        let record = match ring.pull() {
            Some(r) => r,
            None => return Ok(()),
        };

        let is_video = Some(record.track_id) == tracks.video_track;
        let is_audio = Some(record.track_id) == tracks.audio_track;
        if !is_video && !is_audio {
            continue;
        }

        let header = match parse_rtp_header(&record.payload) {
            Ok(h) => h,
            Err(e) => {
                warn!("malformed RTP packet skipped: {e:#}");
                continue;
            }
        };
        let payload = &record.payload[header.payload_start..];

        if is_video {
            handle_video_packet(
                &mut state,
                &window,
                &mut current,
                &mut dts_estimator,
                &tracks,
                header.marker,
                header.timestamp,
                payload,
                start_pcr,
                hls_segment_count,
                hls_segment_duration,
            )?;
        } else {
            handle_audio_packet(
                &mut state,
                &window,
                &mut current,
                &tracks,
                header.marker,
                header.timestamp,
                payload,
                start_pcr,
                hls_segment_count,
                hls_segment_duration,
                segment_min_au_count,
            )?;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_video_packet(
    state: &mut TrackState,
    window: &Arc<Mutex<Window>>,
    current: &mut Option<Arc<Segment>>,
    dts_estimator: &mut crate::dts::DtsEstimator,
    tracks: &PathTracks,
    marker: bool,
    rtp_ts: u32,
    payload: &[u8],
    start_pcr: Instant,
    hls_segment_count: usize,
    hls_segment_duration: Duration,
) -> Result<()> {
    let base = *state.video_base_ts.get_or_insert(rtp_ts);

    let units = match state.h264.push(payload) {
        Ok(DepacketizeOutcome::NeedMore) => return Ok(()),
        Ok(DepacketizeOutcome::Units(units)) => units,
        Err(e) => {
            warn!("h264 depacketizer soft error, packet skipped: {e:#}");
            return Ok(());
        }
    };

    if state.au_buf.is_empty() {
        state.au_base_rtp_ts = Some(rtp_ts);
    }

    for nalu in units {
        let unit_type = match h264::unit_type(&nalu) {
            Ok(t) => t,
            Err(e) => {
                warn!("h264 NAL skipped, bad header: {e:#}");
                continue;
            }
        };
        use h264_reader::nal::UnitType;
        match unit_type {
            UnitType::SeqParameterSet | UnitType::PicParameterSet | UnitType::AccessUnitDelimiter => continue,
            UnitType::SliceLayerWithoutPartitioningIdr => {
                if let (Some(sps), Some(pps)) = (&tracks.sps, &tracks.pps) {
                    state.au_buf.push(sps.clone());
                    state.au_buf.push(pps.clone());
                }
                state.au_buf.push(nalu.to_vec());
                state.au_has_idr = true;
            }
            _ => state.au_buf.push(nalu.to_vec()),
        }
    }

    if !marker {
        return Ok(());
    }

    if state.au_buf.is_empty() {
        return Ok(());
    }

    let now = Instant::now();
    let elapsed_since_start = now.saturating_duration_since(start_pcr);

    let should_discard = !state.au_has_idr && current.as_ref().map(|s| !s.first_written()).unwrap_or(true);
    if should_discard {
        state.au_buf.clear();
        state.au_has_idr = false;
        return Ok(());
    }

    let should_cut = state.au_has_idr
        && current
            .as_ref()
            .map(|s| s.first_written() && s.elapsed_since_first_write(now).unwrap_or(0.0) >= hls_segment_duration.as_secs_f64())
            .unwrap_or(false);

    if should_cut || current.is_none() {
        if let Some(old) = current.take() {
            old.close();
        }
        let new_segment = Arc::new(Segment::new(tracks.video_track, tracks.audio_track));
        window.lock().unwrap().append(new_segment.clone());
        *current = Some(new_segment);
        state.audio_au_count_in_segment = 0;
    }

    let segment = current.as_ref().expect("segment created above");
    segment.set_pcr(elapsed_since_start);

    let au_rtp_ts = state.au_base_rtp_ts.unwrap_or(rtp_ts);
    let pts = (au_rtp_ts.wrapping_sub(base) as i64) + PTS_OFFSET_90K;
    let dts = dts_estimator.push(pts);

    segment.write_h264(dts, pts, state.au_has_idr, &state.au_buf)?;

    state.au_buf.clear();
    state.au_has_idr = false;
    let _ = hls_segment_count;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_audio_packet(
    state: &mut TrackState,
    window: &Arc<Mutex<Window>>,
    current: &mut Option<Arc<Segment>>,
    tracks: &PathTracks,
    _marker: bool,
    rtp_ts: u32,
    payload: &[u8],
    start_pcr: Instant,
    hls_segment_count: usize,
    hls_segment_duration: Duration,
    segment_min_au_count: usize,
) -> Result<()> {
    let sample_rate = tracks.audio_sample_rate.unwrap_or(48_000);
    let base = *state.audio_base_ts.get_or_insert(rtp_ts);

    let units = match state.aac.push(payload) {
        Ok(DepacketizeOutcome::NeedMore) => return Ok(()),
        Ok(DepacketizeOutcome::Units(units)) => units,
        Err(e) => {
            warn!("aac depacketizer soft error, packet skipped: {e:#}");
            return Ok(());
        }
    };

    let video_present = tracks.video_track.is_some();
    let delta_ticks = rtp_ts.wrapping_sub(base) as i64;
    let base_pts_ns = delta_ticks * 1_000_000_000 / sample_rate as i64 + 2_000_000_000;

    for (i, au) in units.iter().enumerate() {
        if video_present {
            let has_open_segment = current.as_ref().map(|s| s.first_written()).unwrap_or(false);
            if !has_open_segment {
                state.audio_au_index += 1;
                continue;
            }
        } else {
            let now = Instant::now();
            let should_cut = current
                .as_ref()
                .map(|s| {
                    s.first_written()
                        && s.elapsed_since_first_write(now).unwrap_or(0.0) >= hls_segment_duration.as_secs_f64()
                        && state.audio_au_count_in_segment >= segment_min_au_count
                })
                .unwrap_or(false);
            if should_cut || current.is_none() {
                if let Some(old) = current.take() {
                    old.close();
                }
                let new_segment = Arc::new(Segment::new(tracks.video_track, tracks.audio_track));
                window.lock().unwrap().append(new_segment.clone());
                *current = Some(new_segment);
                state.audio_au_count_in_segment = 0;
            }
        }

        let Some(segment) = current.as_ref() else {
            state.audio_au_index += 1;
            continue;
        };

        let now = Instant::now();
        segment.set_pcr(now.saturating_duration_since(start_pcr));

        let au_pts_ns = crate::depacketize::aac::au_pts(base_pts_ns, i, sample_rate);
        let pts_90k = (au_pts_ns as i128 * 90_000 / 1_000_000_000) as i64;
        segment.write_aac(sample_rate, tracks.audio_channels.unwrap_or(2), pts_90k, au)?;
        state.audio_au_index += 1;
        state.audio_au_count_in_segment += 1;
    }

    let _ = hls_segment_count;
    Ok(())
}

struct RtpHeader {
    marker: bool,
    timestamp: u32,
    payload_start: usize,
}

/// Parses just enough of the RTP fixed header (RFC 3550 §5.1) to extract the
/// marker bit, timestamp, and payload offset (accounting for the CSRC list).
fn parse_rtp_header(packet: &[u8]) -> Result<RtpHeader> {
    if packet.len() < 12 {
        bail!("RTP packet shorter than fixed header");
    }
    let version = packet[0] >> 6;
    if version != 2 {
        bail!("unsupported RTP version {version}");
    }
    let cc = (packet[0] & 0x0F) as usize;
    let marker = packet[1] & 0x80 != 0;
    let timestamp = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
    let mut offset = 12 + cc * 4;
    if packet[0] & 0x10 != 0 {
        // extension header present
        if packet.len() < offset + 4 {
            bail!("RTP extension header truncated");
        }
        let ext_len_words = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]) as usize;
        offset += 4 + ext_len_words * 4;
    }
    if packet.len() < offset {
        bail!("RTP payload offset past end of packet");
    }
    Ok(RtpHeader { marker, timestamp, payload_start: offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(marker: bool, seq: u16, ts: u32, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0x80, if marker { 0xE0 } else { 0x60 }];
        pkt.extend_from_slice(&seq.to_be_bytes());
        pkt.extend_from_slice(&ts.to_be_bytes());
        pkt.extend_from_slice(&[0, 0, 0, 1]); // SSRC
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn parses_marker_and_timestamp() {
        let pkt = rtp_packet(true, 5, 90_000, &[0x65, 1, 2]);
        let h = parse_rtp_header(&pkt).unwrap();
        assert!(h.marker);
        assert_eq!(h.timestamp, 90_000);
        assert_eq!(&pkt[h.payload_start..], &[0x65, 1, 2]);
    }

    #[test]
    fn rejects_truncated_packet() {
        assert!(parse_rtp_header(&[0x80, 0x60, 0, 1]).is_err());
    }

    #[test]
    fn setup_fails_with_no_tracks() {
        let tracks = PathTracks {
            video_track: None,
            sps: None,
            pps: None,
            audio_track: None,
            audio_sample_rate: None,
            audio_channels: None,
        };
        let ring = Arc::new(Ring::new(4));
        let window = Arc::new(Mutex::new(Window::new(3)));
        let result = run(ring, window, tracks, 3, Duration::from_secs(1), 100);
        assert!(result.is_err());
    }

    #[test]
    fn video_only_opens_segment_on_first_idr_access_unit() {
        let tracks = PathTracks {
            video_track: Some(0),
            sps: Some(vec![0x67, 1]),
            pps: Some(vec![0x68, 2]),
            audio_track: None,
            audio_sample_rate: None,
            audio_channels: None,
        };
        let ring = Arc::new(Ring::new(16));
        let window = Arc::new(Mutex::new(Window::new(3)));

        // IDR slice NAL (type 5), single-packet, marker set -> completes an AU
        ring.push(crate::ring::RtpRecord {
            track_id: 0,
            payload: rtp_packet(true, 1, 90_000, &[0x65, 0xAA, 0xBB]),
        });
        ring.close();

        let w = window.clone();
        run(ring, w, tracks, 3, Duration::from_secs(1), 100).unwrap();
        assert!(!window.lock().unwrap().is_empty());
    }
}
