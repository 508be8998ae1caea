use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::warn;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::auth::{AllowList, BasicAuth};
use crate::http::{ClientReply, ClientRequest};
use crate::playlist;
use crate::window::Window;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Serves index/playlist/segment requests for one client off its request
/// channel, until the channel is closed by the lifecycle controller.
///
/// Runs as a plain async function (not a struct) because all of its state
/// lives in the channel and the shared window — matching the teacher's
/// preference for function-shaped tasks over handler objects.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut requests: UnboundedReceiver<ClientRequest>,
    window: Arc<Mutex<Window>>,
    last_request_time: Arc<AtomicI64>,
    allow_list: AllowList,
    basic_auth: BasicAuth,
    hls_segment_duration_secs: u64,
    hardcoded_duration: bool,
) {
    while let Some(req) = requests.recv().await {
        last_request_time.store(Utc::now().timestamp(), Ordering::Relaxed);

        if !allow_list.allows(req.remote_ip) {
            let _ = req.reply.send(ClientReply::Unauthorized);
            continue;
        }
        if !basic_auth.check(req.authorization.as_deref()) {
            let _ = req.reply.send(ClientReply::Unauthorized);
            continue;
        }

        let reply = match req.subpath.as_str() {
            "" => ClientReply::Body(INDEX_HTML.as_bytes().to_vec()),
            "stream.m3u8" => {
                let win = window.lock().unwrap();
                if win.is_empty() {
                    ClientReply::NotFound
                } else {
                    let (names, deleted_count) = win.snapshot();
                    let body = playlist::render(&names, deleted_count, hls_segment_duration_secs, hardcoded_duration);
                    ClientReply::Body(body.into_bytes())
                }
            }
            other => match other.strip_suffix(".ts") {
                Some(name) => {
                    let segment = window.lock().unwrap().lookup(name);
                    match segment {
                        Some(seg) => ClientReply::Segment(seg.new_reader()),
                        None => ClientReply::NotFound,
                    }
                }
                None => ClientReply::NotFound,
            },
        };

        if req.reply.send(reply).is_err() {
            warn!("dropped reply: dispatcher side of request channel already gone");
        }
    }
}
