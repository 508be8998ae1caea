use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use config::Config;
use log::info;
use tokio::sync::watch;

use hls_egress::http::dispatcher::{self, Dispatcher};
use hls_egress::pathmgr::{PathManager, PathTracks, StaticPathManager};
use hls_egress::settings::Settings;

#[derive(Parser, Debug)]
struct Args {}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let _args = Args::parse();

    let builder = Config::builder()
        .add_source(config::File::with_name("config.yaml").required(false))
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    let settings: Settings = builder.try_deserialize()?;
    let settings = Arc::new(settings);

    // A single static source path until an ingress is wired up: one video
    // track (H.264) and one audio track (AAC), matching the fixed SDP a
    // real deployment would pull from its RTSP source's DESCRIBE response.
    let path_manager: Arc<dyn PathManager> = Arc::new(StaticPathManager::new(PathTracks {
        video_track: Some(0),
        sps: None,
        pps: None,
        audio_track: Some(1),
        audio_sample_rate: Some(48_000),
        audio_channels: Some(2),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(settings.clone(), path_manager, shutdown_rx.clone());

    let addr: SocketAddr = settings.listen_http.parse()?;
    let serve_task = tokio::spawn(dispatcher::serve(addr, dispatcher, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    serve_task.await??;
    Ok(())
}
