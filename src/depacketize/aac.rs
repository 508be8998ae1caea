use anyhow::{bail, Result};
use bytes::{Buf, Bytes};

use super::DepacketizeOutcome;

/// Depacketizes RFC 3640 "generic" AAC-hbr RTP payloads (the framing used by
/// `rtpmap:.../mpeg4-generic`) into individual access units.
///
/// Stateless: each RTP payload is one or more complete AUs, so there is no
/// fragment buffer to carry between calls (unlike H.264 FU-A).
#[derive(Default)]
pub struct AacDepacketizer {
    /// Bit width of each AU-header's `AU-size` field, from the SDP
    /// `sizelength` fmtp parameter. 13 is the common default for LATM/generic.
    size_length_bits: u32,
}

impl AacDepacketizer {
    pub fn new(size_length_bits: u32) -> Self {
        Self { size_length_bits }
    }

    pub fn push(&self, payload: &[u8]) -> Result<DepacketizeOutcome<Bytes>> {
        if payload.len() < 2 {
            bail!("AAC payload too short for AU-headers-length");
        }
        let mut data = Bytes::copy_from_slice(payload);
        let au_headers_length_bits = data.get_u16() as usize;
        let au_headers_length_bytes = au_headers_length_bits.div_ceil(8);
        if data.remaining() < au_headers_length_bytes {
            bail!("AU-headers section exceeds payload length");
        }
        let headers = data.split_to(au_headers_length_bytes);

        let header_bits = self.size_length_bits + 3; // + index/index-delta field, RFC 3640 3.2.1
        let num_headers = if header_bits == 0 {
            0
        } else {
            (au_headers_length_bits) / header_bits as usize
        };

        let mut bit_pos = 0usize;
        let mut sizes = Vec::with_capacity(num_headers);
        for _ in 0..num_headers {
            let size = read_bits(&headers, bit_pos, self.size_length_bits as usize)?;
            sizes.push(size as usize);
            bit_pos += header_bits as usize;
        }

        let mut units = Vec::with_capacity(sizes.len());
        for size in sizes {
            if data.remaining() < size {
                bail!("AAC AU size {size} exceeds remaining payload {}", data.remaining());
            }
            units.push(data.split_to(size));
        }
        Ok(DepacketizeOutcome::Units(units))
    }
}

/// Reads `width` bits starting at bit offset `start` out of a big-endian byte
/// buffer (RFC 3640's AU-header fields are not byte-aligned in general).
fn read_bits(buf: &[u8], start: usize, width: usize) -> Result<u32> {
    if width == 0 {
        return Ok(0);
    }
    if width > 32 {
        bail!("AU-header field wider than 32 bits unsupported");
    }
    let mut value: u32 = 0;
    for i in 0..width {
        let bit_index = start + i;
        let byte = bit_index / 8;
        if byte >= buf.len() {
            bail!("AU-header field runs past end of header section");
        }
        let bit = (buf[byte] >> (7 - (bit_index % 8))) & 1;
        value = (value << 1) | bit as u32;
    }
    Ok(value)
}

/// `basePTS + i * (1e9 / sampleRate)` nanoseconds, per spec.
pub fn au_pts(base_pts: i64, index: usize, sample_rate: u32) -> i64 {
    base_pts + (index as i64) * 1_000_000_000 / sample_rate as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_au_with_13_bit_size_length() {
        let d = AacDepacketizer::new(13);
        // AU-headers-length = 16 bits (one header: 13-bit size + 3-bit index-delta)
        let mut payload = vec![0u8, 16];
        // size = 4 (0b0000000000100), index-delta = 0 -> 16 bits: 0000000000100 000
        payload.push(0b0000_0000);
        payload.push(0b0100_0000);
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        match d.push(&payload).unwrap() {
            DepacketizeOutcome::Units(units) => {
                assert_eq!(units.len(), 1);
                assert_eq!(&units[0][..], &[0xAA, 0xBB, 0xCC, 0xDD][..]);
            }
            _ => panic!("expected Units"),
        }
    }

    #[test]
    fn au_pts_increments_by_sample_period() {
        assert_eq!(au_pts(1_000_000_000, 0, 48000), 1_000_000_000);
        assert_eq!(au_pts(1_000_000_000, 1, 48000), 1_000_000_000 + 1_000_000_000 / 48000);
    }

    #[test]
    fn rejects_truncated_au_header_section() {
        let d = AacDepacketizer::new(13);
        let payload = vec![0u8, 200]; // claims 200 bits of headers, none present
        assert!(d.push(&payload).is_err());
    }
}
