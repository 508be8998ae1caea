pub mod aac;
pub mod h264;

pub use aac::AacDepacketizer;
pub use h264::H264Depacketizer;

/// Result of feeding one RTP payload to a depacketizer.
#[derive(Debug)]
pub enum DepacketizeOutcome<T> {
    /// A fragment is still being reassembled; the caller should skip this
    /// packet silently and wait for more.
    NeedMore,
    /// Zero or more complete units extracted from this packet.
    Units(Vec<T>),
}
