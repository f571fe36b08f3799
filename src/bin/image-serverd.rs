//! Follower image server daemon: serves the RPC surface (§6) and, when
//! `replicationMaster` is configured, keeps the replicator (C5) running
//! alongside it.

use std::sync::Arc;

use anyhow::{Context, Error};
use tokio::net::TcpListener;

use image_replicator::api2::{self, ImageServerContext};
use image_replicator::backup::image_db::ImageDatabase;
use image_replicator::backup::object_store::ObjectStore;
use image_replicator::client::connection::CpuSharer;
use image_replicator::client::pull;
use image_replicator::config;
use image_replicator::server::InjectionRegistry;
use image_replicator::wire::MessageStream;

fn main() -> Result<(), Error> {
    env_logger::init();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run())
}

async fn run() -> Result<(), Error> {
    let config = config::config().context("loading replication config")?;

    let object_store = Arc::new(ObjectStore::new(config.object_store_root.clone()));
    let image_db = Arc::new(
        ImageDatabase::open(config.image_database_root.clone())
            .context("opening image database")?,
    );
    let (updates_tx, _) = tokio::sync::broadcast::channel(1024);

    let ctx = ImageServerContext {
        object_store,
        image_db,
        injection_registry: InjectionRegistry::new(),
        config: config.clone(),
        updates_tx,
    };

    if ctx.config.replication_enabled() {
        let replicator_ctx = ctx.clone();
        tokio::spawn(pull::run(replicator_ctx, CpuSharer::unbounded()));
        log::info!(
            "replication from {} enabled (archive_mode={})",
            ctx.config.replication_master,
            ctx.config.archive_mode
        );
    } else {
        log::info!("replication disabled (no replicationMaster configured)");
    }

    serve(ctx).await
}

async fn serve(ctx: ImageServerContext) -> Result<(), Error> {
    let listener = TcpListener::bind(&ctx.config.listen_address)
        .await
        .with_context(|| format!("binding {}", ctx.config.listen_address))?;
    log::info!("listening on {}", ctx.config.listen_address);

    loop {
        let (socket, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            log::debug!("accepted connection from {}", peer);
            if let Err(err) = serve_connection(ctx, socket).await {
                log::warn!("connection from {} ended with error: {}", peer, err);
            }
        });
    }
}

async fn serve_connection(ctx: ImageServerContext, socket: tokio::net::TcpStream) -> Result<(), Error> {
    let mut stream = MessageStream::new(socket);
    while let Some(message) = stream.recv().await? {
        api2::dispatch(&ctx, &mut stream, message).await?;
    }
    Ok(())
}
