use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use log::info;
use tokio::sync::{oneshot, watch};

use crate::auth::REALM;
use crate::client::{self, Client};
use crate::http::{ClientReply, ClientRequest};
use crate::pathmgr::PathManager;
use crate::settings::Settings;

type ResponseBody = BoxBody<Bytes, anyhow::Error>;

/// HTTP front door: listens, decodes `<path>/<subpath>`, forwards to the
/// right client's request channel, and copies the reply to the response.
/// The exact `hyper::service::Service` shape the teacher uses for its own
/// `HttpServer`, generalized from "index/static-files/overseer-API" to
/// "index/playlist/segment".
#[derive(Clone)]
pub struct Dispatcher {
    settings: Arc<Settings>,
    path_manager: Arc<dyn PathManager>,
    shutdown: watch::Receiver<bool>,
    clients: Arc<Mutex<HashMap<String, Arc<Client>>>>,
    remote_ip: IpAddr,
}

impl Dispatcher {
    pub fn new(settings: Arc<Settings>, path_manager: Arc<dyn PathManager>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            settings,
            path_manager,
            shutdown,
            clients: Arc::new(Mutex::new(HashMap::new())),
            remote_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// Per-connection clone carrying the peer's address, since `accept()`
    /// only hands us the remote addr once, at connection time.
    pub fn with_remote_ip(&self, ip: IpAddr) -> Self {
        Self { remote_ip: ip, ..self.clone() }
    }

    fn get_or_create_client(&self, path: &str) -> Arc<Client> {
        let mut clients = self.clients.lock().unwrap();
        if let Some(c) = clients.get(path) {
            return c.clone();
        }
        let clients_map = self.clients.clone();
        let path_owned = path.to_string();
        let path_for_removal = path_owned.clone();
        let new_client = client::spawn(
            path_owned,
            self.settings.clone(),
            self.path_manager.clone(),
            self.shutdown.clone(),
            move || {
                clients_map.lock().unwrap().remove(&path_for_removal);
            },
        );
        clients.insert(path.to_string(), new_client.clone());
        new_client
    }
}

fn not_found() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()).map_err(|e: std::convert::Infallible| match e {}).boxed())
        .expect("static response")
}

fn unauthorized() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("WWW-Authenticate", format!("Basic realm=\"{REALM}\""))
        .body(Full::new(Bytes::new()).map_err(|e: std::convert::Infallible| match e {}).boxed())
        .expect("static response")
}

fn redirect(location: String) -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header("Location", location)
        .body(Full::new(Bytes::new()).map_err(|e: std::convert::Infallible| match e {}).boxed())
        .expect("static response")
}

fn body_response(content_type: &'static str, bytes: Vec<u8>) -> Response<ResponseBody> {
    Response::builder()
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(bytes)).map_err(|e: std::convert::Infallible| match e {}).boxed())
        .expect("static response")
}

impl Service<Request<Incoming>> for Dispatcher {
    type Response = Response<ResponseBody>;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        info!("{} {} from {}", req.method(), req.uri(), self.remote_ip);

        let raw_path = req.uri().path().trim_start_matches('/');
        if raw_path.is_empty() || raw_path == "favicon.ico" {
            return Box::pin(async { Ok(not_found()) });
        }

        let Some(slash) = raw_path.find('/') else {
            let location = format!("{raw_path}/");
            return Box::pin(async move { Ok(redirect(location)) });
        };
        let (path, subpath) = raw_path.split_at(slash);
        let subpath = &subpath[1..];

        let authorization = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let client = self.get_or_create_client(path);
        let (reply_tx, reply_rx) = oneshot::channel();
        let forwarded = client.forward(ClientRequest {
            subpath: subpath.to_string(),
            remote_ip: self.remote_ip,
            authorization,
            reply: reply_tx,
        });

        if forwarded.is_err() {
            return Box::pin(async { Ok(not_found()) });
        }

        Box::pin(async move {
            let reply = match reply_rx.await {
                Ok(reply) => reply,
                Err(_) => ClientReply::NotFound,
            };
            Ok(match reply {
                ClientReply::Body(bytes) if subpath_is_playlist(subpath) => body_response("application/vnd.apple.mpegurl", bytes),
                ClientReply::Body(bytes) => body_response("text/html", bytes),
                ClientReply::Segment(mut reader) => {
                    let bytes = reader.read_to_end();
                    body_response("video/mp2t", bytes)
                }
                ClientReply::Unauthorized => unauthorized(),
                ClientReply::NotFound => not_found(),
            })
        })
    }
}

fn subpath_is_playlist(subpath: &str) -> bool {
    subpath == "stream.m3u8"
}

/// Binds and accepts connections, dispatching each to its own task — the
/// `TcpListener` + `TokioIo` + `http1::Builder` loop used by the teacher's
/// own binary entry point.
pub async fn serve(addr: std::net::SocketAddr, dispatcher: Dispatcher, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HLS egress listening on: {addr}");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let io = hyper_util::rt::TokioIo::new(socket);
                let conn_dispatcher = dispatcher.with_remote_ip(peer.ip());
                tokio::spawn(async move {
                    if let Err(e) = hyper::server::conn::http1::Builder::new().serve_connection(io, conn_dispatcher).await {
                        log::error!("connection error: {e}");
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("HLS egress listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}
