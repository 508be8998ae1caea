use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use h264_reader::nal::{NalHeader, UnitType};

use super::DepacketizeOutcome;

/// Reassembles RFC 6184 H.264/RTP payloads into NAL units.
///
/// Handles single-NAL packets, STAP-A aggregation, and FU-A fragmentation.
/// Does not look at access-unit boundaries or NAL semantics beyond
/// classification — that is the writer's job (it accumulates NALs across
/// packets until the RTP marker bit).
///
/// Grounded on the FU-A fragment-buffer state machine used by RTSP H.264
/// demuxers in the wild: a single in-progress fragment buffer, start/end bit
/// checks, and NAL-header reconstruction from the FU indicator + FU header.
pub struct H264Depacketizer {
    frag_buf: Option<BytesMut>,
    frag_high_water: usize,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self {
            frag_buf: None,
            frag_high_water: 0,
        }
    }

    pub fn push(&mut self, payload: &[u8]) -> Result<DepacketizeOutcome<Bytes>> {
        if payload.is_empty() {
            bail!("empty RTP payload");
        }
        let nal_header = payload[0];
        if (nal_header >> 7) != 0 {
            bail!("NAL header has forbidden_zero_bit set");
        }

        match nal_header & 0x1F {
            1..=23 => {
                if self.frag_buf.is_some() {
                    bail!("single NAL received while a fragment is in progress");
                }
                Ok(DepacketizeOutcome::Units(vec![Bytes::copy_from_slice(payload)]))
            }
            24 => Ok(DepacketizeOutcome::Units(self.parse_stap_a(payload)?)),
            28 => self.push_fu_a(nal_header, payload),
            other => bail!("unsupported NAL aggregation/fragmentation type {other}"),
        }
    }

    fn parse_stap_a(&self, payload: &[u8]) -> Result<Vec<Bytes>> {
        let mut data = Bytes::copy_from_slice(payload);
        data.advance(1);
        let mut out = Vec::new();
        while data.remaining() >= 2 {
            let len = data.get_u16() as usize;
            if data.remaining() < len {
                bail!("STAP-A NAL length {len} exceeds remaining {}", data.remaining());
            }
            out.push(data.split_to(len));
        }
        Ok(out)
    }

    fn push_fu_a(&mut self, indicator: u8, payload: &[u8]) -> Result<DepacketizeOutcome<Bytes>> {
        if payload.len() < 3 {
            bail!("FU-A payload too short");
        }
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let reserved = fu_header & 0x20 != 0;
        if (start && end) || reserved {
            bail!("invalid FU-A header {fu_header:08b}");
        }
        let reconstructed_header = (indicator & 0xE0) | (fu_header & 0x1F);

        match (start, self.frag_buf.take()) {
            (true, Some(_)) => bail!("FU-A start bit set while a fragment is already in progress"),
            (true, None) => {
                let mut buf = BytesMut::with_capacity(self.frag_high_water.max(payload.len() - 1));
                buf.put_u8(reconstructed_header);
                buf.put_slice(&payload[2..]);
                self.frag_buf = Some(buf);
                Ok(DepacketizeOutcome::NeedMore)
            }
            (false, Some(mut buf)) => {
                if buf[0] != reconstructed_header {
                    bail!("FU-A fragment changed NAL type mid-stream");
                }
                buf.put_slice(&payload[2..]);
                if end {
                    self.frag_high_water = buf.len();
                    Ok(DepacketizeOutcome::Units(vec![buf.freeze()]))
                } else {
                    self.frag_buf = Some(buf);
                    Ok(DepacketizeOutcome::NeedMore)
                }
            }
            (false, None) => bail!("FU-A continuation with no fragment in progress"),
        }
    }
}

pub fn unit_type(nal: &[u8]) -> Result<UnitType> {
    if nal.is_empty() {
        bail!("empty NAL unit");
    }
    let header = NalHeader::new(nal[0]).map_err(|e| anyhow::anyhow!("bad NAL header: {e:?}"))?;
    Ok(header.nal_unit_type())
}

pub fn is_idr(nal: &[u8]) -> bool {
    matches!(unit_type(nal), Ok(UnitType::SliceLayerWithoutPartitioningIdr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_nal_passes_through_unchanged() {
        let mut d = H264Depacketizer::new();
        let nal = [0x67, 1, 2, 3]; // SPS
        match d.push(&nal).unwrap() {
            DepacketizeOutcome::Units(units) => assert_eq!(units, vec![Bytes::copy_from_slice(&nal)]),
            _ => panic!("expected Units"),
        }
    }

    #[test]
    fn fu_a_reassembles_a_fragmented_idr() {
        let mut d = H264Depacketizer::new();
        let indicator = 0x65 & 0xE0 | 28; // same nal_ref_idc as slice, type=FU-A
        let start = [indicator, 0x80 | 0x05, 0xAA, 0xBB]; // start bit, type=5 (IDR)
        let end = [indicator, 0x40 | 0x05, 0xCC, 0xDD];
        assert!(matches!(d.push(&start).unwrap(), DepacketizeOutcome::NeedMore));
        match d.push(&end).unwrap() {
            DepacketizeOutcome::Units(units) => {
                assert_eq!(units.len(), 1);
                assert_eq!(&units[0][..], &[0x65, 0xAA, 0xBB, 0xCC, 0xDD][..]);
                assert!(is_idr(&units[0]));
            }
            _ => panic!("expected Units"),
        }
    }

    #[test]
    fn stap_a_splits_multiple_nalus() {
        let d = H264Depacketizer::new();
        let mut payload = vec![24u8];
        payload.extend_from_slice(&[0, 2, 0x67, 0xAA]);
        payload.extend_from_slice(&[0, 2, 0x68, 0xBB]);
        let units = d.parse_stap_a(&payload).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0][..], &[0x67, 0xAA][..]);
        assert_eq!(&units[1][..], &[0x68, 0xBB][..]);
    }

    #[test]
    fn fu_a_rejects_continuation_without_start() {
        let mut d = H264Depacketizer::new();
        let indicator = 28;
        let continuation = [indicator, 0x05, 0xAA];
        assert!(d.push(&continuation).is_err());
    }
}
