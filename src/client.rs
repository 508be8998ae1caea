use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::auth::{AllowList, BasicAuth};
use crate::http::{self, ClientReply, ClientRequest};
use crate::pathmgr::PathManager;
use crate::ring::Ring;
use crate::settings::Settings;
use crate::window::Window;
use crate::writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainReason {
    SetupFailed,
    Inactivity,
    WriterDone,
    External,
}

/// A client's externally-visible handle: the request-forwarding capability
/// the dispatcher uses, plus the activity clock the handler updates.
///
/// Owns the request channel's `Sender` behind an `Option` so the lifecycle
/// controller's draining step can close it exactly once (see DESIGN.md) by
/// taking it out rather than relying on every error path remembering to
/// drop it.
pub struct Client {
    id: Uuid,
    request_tx: Mutex<Option<mpsc::UnboundedSender<ClientRequest>>>,
    last_request_time: Arc<AtomicI64>,
}

impl Client {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Forwards a request from the dispatcher. Returns the request back to
    /// the caller if the client has already closed its channel, so the
    /// dispatcher can reply 404 instead of hanging.
    pub fn forward(&self, req: ClientRequest) -> Result<(), ClientRequest> {
        let guard = self.request_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(req).map_err(|e| e.0),
            None => Err(req),
        }
    }

    fn close_request_channel(&self) {
        self.request_tx.lock().unwrap().take();
    }
}

/// Spawns a client's full lifecycle controller: setup, writer, request
/// handler, idle ticker, and strict-order draining. `on_terminate` is called
/// exactly once, after teardown completes, so the caller (the client
/// registry) can remove its map entry without the client holding a live
/// back-reference to the registry — the cyclic-reference problem is instead
/// modeled as a one-shot capability handed down at spawn time.
pub fn spawn(
    path: String,
    settings: Arc<Settings>,
    path_manager: Arc<dyn PathManager>,
    shutdown: watch::Receiver<bool>,
    on_terminate: impl FnOnce() + Send + 'static,
) -> Arc<Client> {
    let (tx, rx) = mpsc::unbounded_channel();
    let last_request_time = Arc::new(AtomicI64::new(Utc::now().timestamp()));
    let client = Arc::new(Client {
        id: Uuid::new_v4(),
        request_tx: Mutex::new(Some(tx)),
        last_request_time: last_request_time.clone(),
    });

    let task_client = client.clone();
    tokio::spawn(async move {
        run(path, settings, path_manager, rx, last_request_time, task_client, shutdown, on_terminate).await;
    });

    client
}

#[allow(clippy::too_many_arguments)]
async fn run(
    path: String,
    settings: Arc<Settings>,
    path_manager: Arc<dyn PathManager>,
    requests_rx: mpsc::UnboundedReceiver<ClientRequest>,
    last_request_time: Arc<AtomicI64>,
    client: Arc<Client>,
    mut shutdown: watch::Receiver<bool>,
    on_terminate: impl FnOnce() + Send + 'static,
) {
    info!("client {} setup for path {path}", client.id());

    let tracks = match path_manager.setup_and_play(&path).await {
        Ok(t) => t,
        Err(e) => {
            error!("unable to find a video or audio track for {path}: {e:#}");
            drain_with_not_found(requests_rx, &mut shutdown).await;
            finish(&path, &path_manager, &client, DrainReason::SetupFailed, None, on_terminate).await;
            return;
        }
    };

    let window = Arc::new(Mutex::new(Window::new(settings.hls_segment_count)));
    let ring = Arc::new(Ring::new(settings.read_buffer_count));

    let writer_handle = match writer::spawn(
        ring.clone(),
        window.clone(),
        tracks,
        settings.hls_segment_count,
        Duration::from_secs(settings.hls_segment_duration_secs),
        settings.segment_min_au_count,
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to start writer for {path}: {e:#}");
            drain_with_not_found(requests_rx, &mut shutdown).await;
            finish(&path, &path_manager, &client, DrainReason::SetupFailed, None, on_terminate).await;
            return;
        }
    };

    let allow_list = AllowList::parse(&settings.allow_ips).unwrap_or_else(|e| {
        error!("bad allow_ips config, denying no one: {e:#}");
        AllowList::default()
    });
    let basic_auth = BasicAuth::new(settings.basic_auth.clone());

    let handler = tokio::spawn(http::handler::run(
        requests_rx,
        window.clone(),
        last_request_time.clone(),
        allow_list,
        basic_auth,
        settings.hls_segment_duration_secs,
        true,
    ));

    let (writer_done_tx, writer_done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("hls-writer-join".to_string())
        .spawn(move || {
            let _ = writer_done_tx.send(writer_handle.join());
        })
        .ok();
    tokio::pin!(writer_done_rx);

    let mut idle_ticker = tokio::time::interval(Duration::from_secs(settings.close_check_period_secs.max(1)));
    let close_after = settings.close_after_inactivity_secs as i64;

    info!("client {} playing for path {path}", client.id());
    let reason = loop {
        tokio::select! {
            _ = idle_ticker.tick() => {
                let now = Utc::now().timestamp();
                if now - last_request_time.load(Ordering::Relaxed) >= close_after {
                    break DrainReason::Inactivity;
                }
            }
            res = &mut writer_done_rx => {
                if let Ok(Err(e)) = res {
                    warn!("writer for {path} exited with error: {e:#}");
                }
                break DrainReason::WriterDone;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break DrainReason::External;
                }
            }
        }
    };

    info!("client {} draining for path {path}, reason={reason:?}", client.id());

    // Step 1: close the ring, causing the writer to return.
    ring.close();
    // Step 2: join the writer (already underway if WriterDone woke us).
    if reason != DrainReason::WriterDone {
        let _ = writer_done_rx.await;
    }
    // Steps 3-6: detach from path, close request channel, join handler, notify parent.
    finish(&path, &path_manager, &client, reason, Some(handler), on_terminate).await;
}

async fn drain_with_not_found(mut requests_rx: mpsc::UnboundedReceiver<ClientRequest>, shutdown: &mut watch::Receiver<bool>) {
    loop {
        tokio::select! {
            req = requests_rx.recv() => {
                match req {
                    Some(req) => { let _ = req.reply.send(ClientReply::NotFound); }
                    None => return,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn finish(
    path: &str,
    path_manager: &Arc<dyn PathManager>,
    client: &Arc<Client>,
    reason: DrainReason,
    handler: Option<tokio::task::JoinHandle<()>>,
    on_terminate: impl FnOnce() + Send + 'static,
) {
    if reason != DrainReason::SetupFailed {
        if let Err(e) = path_manager.on_client_remove(path, client.id()).await {
            warn!("on_client_remove failed for {path}: {e:#}");
        }
    }
    // Step 4: close the request channel and join the handler before telling
    // the parent we're done, so a replacement client can't be handed a
    // request while this one's handler is still mid-flight. No handler was
    // spawned if setup failed before one existed; closing the channel alone
    // is then enough (nothing is holding it open).
    client.close_request_channel();
    if let Some(handler) = handler {
        let _ = handler.await;
    }
    if let Err(e) = path_manager.on_client_close(path, client.id()).await {
        warn!("on_client_close failed for {path}: {e:#}");
    }
    on_terminate();
}
