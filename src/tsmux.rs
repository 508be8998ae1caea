use std::time::Duration;

use anyhow::{bail, Result};
use bytes::{BufMut, BytesMut};

const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;

const PID_PAT: u16 = 0x0000;
const PID_PMT: u16 = 0x1000;
const PID_VIDEO: u16 = 0x0100;
const PID_AUDIO: u16 = 0x0101;

const STREAM_ID_VIDEO: u8 = 0xE0;
const STREAM_ID_AUDIO: u8 = 0xC0;

const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;

/// MPEG-2 CRC-32 (ITU-T H.222.0 / ISO 13818-1): poly 0x04C11DB7, init
/// 0xFFFFFFFF, no reflection, no final xor. Distinct from the zlib CRC-32.
fn mpeg2_crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        let top = (crc >> 24) as u8 ^ byte;
        crc = (crc << 8) ^ CRC_TABLE[top as usize];
    }
    crc
}

const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Hand-rolled MPEG-TS muxer: the "assumed primitive" of spec.md §1,
/// implemented at the byte level (PAT/PMT once per segment, PES framing per
/// access unit, PCR insertion) since no published crate in the reference
/// pack offers TS *writing*.
pub struct TsMuxer {
    buf: Vec<u8>,
    has_video: bool,
    has_audio: bool,
    psi_written: bool,
    cc_pat: u8,
    cc_pmt: u8,
    cc_video: u8,
    cc_audio: u8,
    pending_pcr: Option<Duration>,
}

impl TsMuxer {
    pub fn new(has_video: bool, has_audio: bool) -> Self {
        Self {
            buf: Vec::new(),
            has_video,
            has_audio,
            psi_written: false,
            cc_pat: 0,
            cc_pmt: 0,
            cc_video: 0,
            cc_audio: 0,
            pending_pcr: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn read_at(&self, pos: usize, out: &mut [u8]) -> usize {
        if pos >= self.buf.len() {
            return 0;
        }
        let n = out.len().min(self.buf.len() - pos);
        out[..n].copy_from_slice(&self.buf[pos..pos + n]);
        n
    }

    pub fn set_pcr(&mut self, elapsed: Duration) {
        self.pending_pcr = Some(elapsed);
    }

    fn pcr_pid(&self) -> u16 {
        if self.has_video {
            PID_VIDEO
        } else {
            PID_AUDIO
        }
    }

    fn ensure_psi(&mut self) {
        if self.psi_written {
            return;
        }
        self.write_pat();
        self.write_pmt();
        self.psi_written = true;
    }

    fn write_pat(&mut self) {
        let mut section = BytesMut::new();
        section.put_u16(1); // program_number
        section.put_u16(0xE000 | PID_PMT); // reserved(3) + program_map_PID(13)
        let body = self.wrap_psi_section(0x00, 1, &section);
        self.emit_psi_packet(PID_PAT, &body, Self::next_cc(&mut self.cc_pat.clone()));
        self.cc_pat = (self.cc_pat + 1) & 0x0F;
    }

    fn write_pmt(&mut self) {
        let mut section = BytesMut::new();
        section.put_u16(0xE000 | self.pcr_pid());
        section.put_u16(0xF000); // reserved(4) + program_info_length(12) = 0

        if self.has_video {
            section.put_u8(STREAM_TYPE_H264);
            section.put_u16(0xE000 | PID_VIDEO);
            section.put_u16(0xF000); // ES_info_length = 0
        }
        if self.has_audio {
            section.put_u8(STREAM_TYPE_AAC_ADTS);
            section.put_u16(0xE000 | PID_AUDIO);
            section.put_u16(0xF000);
        }

        let body = self.wrap_psi_section(0x02, 1, &section);
        self.emit_psi_packet(PID_PMT, &body, self.cc_pmt);
        self.cc_pmt = (self.cc_pmt + 1) & 0x0F;
    }

    /// Wraps a PAT/PMT section body with table_id/section_length/CRC, per
    /// ISO 13818-1 "program_association_section"/"TS_program_map_section".
    fn wrap_psi_section(&self, table_id: u8, table_id_ext: u16, body: &BytesMut) -> BytesMut {
        let mut section = BytesMut::new();
        section.put_u8(table_id);
        // section_syntax_indicator(1)=1, '0'(1), reserved(2), section_length(12)
        let section_length = body.len() + 5 + 4; // + header fields + crc
        section.put_u16(0xB000 | (section_length as u16 & 0x0FFF));
        section.put_u16(table_id_ext);
        section.put_u8(0xC1); // reserved(2) + version_number(5) + current_next_indicator(1)
        section.put_u8(0); // section_number
        section.put_u8(0); // last_section_number
        section.extend_from_slice(body);

        let crc = mpeg2_crc32(&section);
        section.put_u32(crc);
        section
    }

    fn next_cc(cc: &mut u8) -> u8 {
        let v = *cc;
        *cc = (*cc + 1) & 0x0F;
        v
    }

    fn emit_psi_packet(&mut self, pid: u16, section: &BytesMut, cc: u8) {
        let mut pkt = BytesMut::with_capacity(TS_PACKET_SIZE);
        pkt.put_u8(SYNC_BYTE);
        pkt.put_u16(0x4000 | pid); // PUSI=1, pid
        pkt.put_u8(0x10 | (cc & 0x0F)); // no scrambling, payload only
        pkt.put_u8(0); // pointer_field
        pkt.extend_from_slice(section);
        while pkt.len() < TS_PACKET_SIZE {
            pkt.put_u8(0xFF);
        }
        self.buf.extend_from_slice(&pkt[..TS_PACKET_SIZE]);
    }

    /// Writes one elementary-stream access unit as a PES packet, split into
    /// 188-byte TS packets on `pid`.
    #[allow(clippy::too_many_arguments)]
    fn write_pes(
        &mut self,
        pid: u16,
        stream_id: u8,
        pts_90k: i64,
        dts_90k: Option<i64>,
        random_access: bool,
        payload: &[u8],
    ) {
        self.ensure_psi();

        let mut pes = BytesMut::new();
        pes.put_u8(0x00);
        pes.put_u8(0x00);
        pes.put_u8(0x01);
        pes.put_u8(stream_id);
        pes.put_u16(0); // PES_packet_length: unbounded (video) / let TS framing carry audio too
        let has_dts = dts_90k.is_some();
        pes.put_u8(0x80); // '10' + no scrambling, no priority, data_alignment=0, not copyrighted, original
        pes.put_u8(if has_dts { 0xC0 } else { 0x80 }); // PTS_DTS_flags
        pes.put_u8(if has_dts { 10 } else { 5 }); // PES_header_data_length
        write_timestamp(&mut pes, if has_dts { 0x3 } else { 0x2 }, pts_90k as u64);
        if let Some(dts) = dts_90k {
            write_timestamp(&mut pes, 0x1, dts as u64);
        }
        pes.extend_from_slice(payload);

        let is_video = pid == PID_VIDEO;
        let needs_pcr = self.pending_pcr.is_some() && pid == self.pcr_pid();

        let mut remaining = &pes[..];
        let mut first = true;
        while !remaining.is_empty() {
            let cc = if is_video {
                Self::next_cc(&mut self.cc_video)
            } else {
                Self::next_cc(&mut self.cc_audio)
            };

            let mut pkt = BytesMut::with_capacity(TS_PACKET_SIZE);
            pkt.put_u8(SYNC_BYTE);
            let pusi = if first { 0x4000 } else { 0x0000 };
            pkt.put_u16(pusi | pid);

            let want_adaptation = first && (needs_pcr || random_access);
            pkt.put_u8(
                0x10 | if want_adaptation { 0x20 } else { 0x00 } | (cc & 0x0F),
            );

            let header_len = if want_adaptation { 5 } else { 4 };
            let space = TS_PACKET_SIZE - header_len;
            let take = remaining.len().min(space);
            let stuffing = space - take;

            if want_adaptation {
                write_adaptation_field(
                    &mut pkt,
                    stuffing,
                    if first && random_access { Some(()) } else { None },
                    if first && needs_pcr {
                        self.pending_pcr.take()
                    } else {
                        None
                    },
                );
            }

            pkt.extend_from_slice(&remaining[..take]);
            while pkt.len() < TS_PACKET_SIZE {
                pkt.put_u8(0xFF);
            }
            self.buf.extend_from_slice(&pkt[..TS_PACKET_SIZE]);

            remaining = &remaining[take..];
            first = false;
        }
    }

    pub fn write_h264(&mut self, dts_90k: i64, pts_90k: i64, is_idr: bool, nalus: &[Vec<u8>]) -> Result<()> {
        if !self.has_video {
            bail!("segment has no video track");
        }
        let mut payload = Vec::new();
        for nalu in nalus {
            payload.extend_from_slice(&[0, 0, 0, 1]);
            payload.extend_from_slice(nalu);
        }
        self.write_pes(PID_VIDEO, STREAM_ID_VIDEO, pts_90k, Some(dts_90k), is_idr, &payload);
        Ok(())
    }

    pub fn write_aac(&mut self, sample_rate: u32, channels: u8, pts_90k: i64, au: &[u8]) -> Result<()> {
        if !self.has_audio {
            bail!("segment has no audio track");
        }
        let mut payload = Vec::with_capacity(au.len() + 7);
        write_adts_header(&mut payload, sample_rate, channels, au.len());
        payload.extend_from_slice(au);
        self.write_pes(PID_AUDIO, STREAM_ID_AUDIO, pts_90k, None, false, &payload);
        Ok(())
    }
}

/// Writes a 5-byte PTS/DTS-style timestamp field with the given 4-bit marker
/// ('0010' PTS-only, '0011' PTS-of-pair, '0001' DTS), per ISO 13818-1 2.4.3.7.
fn write_timestamp(buf: &mut BytesMut, marker: u8, value_90k: u64) {
    let v = value_90k & 0x1_FFFF_FFFF;
    buf.put_u8((marker << 4) | (((v >> 30) & 0x07) as u8) << 1 | 1);
    buf.put_u16((((v >> 14) & 0xFFFF) as u16) | 1);
    buf.put_u16((((v << 1) & 0xFFFF) as u16) | 1);
}

fn write_adaptation_field(
    buf: &mut BytesMut,
    stuffing: usize,
    random_access: Option<()>,
    pcr: Option<Duration>,
) {
    let pcr_len = if pcr.is_some() { 6 } else { 0 };
    let length = 1 + pcr_len + stuffing; // flags byte + optional pcr + stuffing
    buf.put_u8(length as u8);
    let mut flags = 0u8;
    if random_access.is_some() {
        flags |= 0x40;
    }
    if pcr.is_some() {
        flags |= 0x10;
    }
    buf.put_u8(flags);
    if let Some(elapsed) = pcr {
        let ticks_27m = (elapsed.as_secs_f64() * 27_000_000.0) as u64;
        let base = (ticks_27m / 300) & 0x1_FFFF_FFFF;
        let ext = (ticks_27m % 300) as u16 & 0x1FF;
        buf.put_u8((base >> 25) as u8);
        buf.put_u8((base >> 17) as u8);
        buf.put_u8((base >> 9) as u8);
        buf.put_u8((base >> 1) as u8);
        buf.put_u8((((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8));
        buf.put_u8((ext & 0xFF) as u8);
    }
    for _ in 0..stuffing {
        buf.put_u8(0xFF);
    }
}

/// Minimal 7-byte ADTS header wrapping a raw AAC access unit, so the segment
/// carries self-describing audio frames (MediaMTX-style HLS muxers do the
/// same for AAC-in-TS).
fn write_adts_header(buf: &mut Vec<u8>, sample_rate: u32, channels: u8, aac_len: usize) {
    const SAMPLE_RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    let freq_idx = SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(3) as u8; // default 48000
    let frame_len = (aac_len + 7) as u16;

    buf.push(0xFF);
    buf.push(0xF1); // MPEG-4, no CRC
    buf.push((1 << 6) | (freq_idx << 2) | ((channels >> 2) & 0x1));
    buf.push(((channels & 0x3) << 6) | ((frame_len >> 11) as u8 & 0x3));
    buf.push((frame_len >> 3) as u8);
    buf.push(((frame_len & 0x7) as u8) << 5 | 0x1F);
    buf.push(0xFC);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(mpeg2_crc32(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn first_video_write_produces_pat_pmt_then_pes_packets() {
        let mut mux = TsMuxer::new(true, false);
        mux.write_h264(0, 180_000, true, &[vec![0x65, 1, 2, 3]]).unwrap();
        assert!(mux.len() >= TS_PACKET_SIZE * 3);
        assert_eq!(mux.len() % TS_PACKET_SIZE, 0);
        let mut first = [0u8; 1];
        mux.read_at(0, &mut first);
        assert_eq!(first[0], SYNC_BYTE);
    }

    #[test]
    fn audio_only_mux_rejects_video_write() {
        let mut mux = TsMuxer::new(false, true);
        assert!(mux.write_h264(0, 0, true, &[]).is_err());
    }

    #[test]
    fn large_access_unit_spans_multiple_ts_packets() {
        let mut mux = TsMuxer::new(true, false);
        let nalu = vec![0x65u8; 1000];
        mux.write_h264(0, 180_000, true, &[nalu]).unwrap();
        // at least: PAT + PMT + >= 2 PES-carrying packets
        assert!(mux.len() >= TS_PACKET_SIZE * 4);
    }

    /// Regression for a PTS/DTS top-bits encoding bug: a value past 2^29
    /// ticks (~99 minutes at the 90kHz clock) must still round-trip through
    /// the 3/15/15-bit split, not just small test-sized values.
    #[test]
    fn timestamp_round_trips_past_2_29_ticks() {
        let value: u64 = 600_000_000; // > 2^29 (536_870_912)
        let mut buf = BytesMut::new();
        write_timestamp(&mut buf, 0x3, value);
        assert_eq!(buf.len(), 5);

        let top = ((buf[0] >> 1) & 0x07) as u64;
        let word1 = u16::from_be_bytes([buf[1], buf[2]]);
        let word2 = u16::from_be_bytes([buf[3], buf[4]]);
        let mid = ((word1 >> 1) & 0x7FFF) as u64;
        let low = ((word2 >> 1) & 0x7FFF) as u64;
        let decoded = (top << 30) | (mid << 15) | low;

        assert_eq!(decoded, value & 0x1_FFFF_FFFF);
        assert_eq!(buf[0] >> 4, 0x3);
    }
}
