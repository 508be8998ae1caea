pub mod dispatcher;
pub mod handler;

use std::net::IpAddr;

use tokio::sync::oneshot;

use crate::segment::SegmentReader;

/// One HTTP request forwarded from the dispatcher to a client's request
/// handler task, mirroring the `ipc::Rx`/reply-channel convention the
/// teacher uses for its own cross-task messaging.
pub struct ClientRequest {
    pub subpath: String,
    pub remote_ip: IpAddr,
    pub authorization: Option<String>,
    pub reply: oneshot::Sender<ClientReply>,
}

/// What the request handler hands back to the dispatcher. `Body`-carrying
/// variants are fully buffered (index page, playlist); segment bytes stream
/// from the segment's own reader.
pub enum ClientReply {
    Body(Vec<u8>),
    Segment(SegmentReader),
    Unauthorized,
    NotFound,
}
