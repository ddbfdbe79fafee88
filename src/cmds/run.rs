// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `run` subcommand (§4.J): loads configuration, starts a recorder thread
//! for every enabled, record-flagged stream, and serves the HTTP surface
//! (§6) until SIGINT or SIGTERM requests a graceful shutdown.

use crate::config::Config;
use crate::dedup::Dedup;
use crate::manifest::ManifestBuilder;
use crate::recorder::{Recorder, RecorderCtx};
use crate::registry::Registry;
use crate::stream_source::UnimplementedOpener;
use crate::web;
use base::clock::RealClocks;
use base::{err, Error};
use bpaf::Bpaf;
use db::{RecordingCatalog, StreamStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Cap on stream rows loaded at startup; comfortably above any realistic
/// deployment, just so a malformed catalog can't make this scan unbounded.
const MAX_STREAMS: usize = 10_000;

/// Starts the recorder engine and HTTP surface.
#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    /// Path to the TOML configuration file.
    #[bpaf(long("config"), argument("PATH"))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = Config::load(&args.config)?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(worker_threads) = config.worker_threads {
        builder.worker_threads(worker_threads);
    }
    let rt = builder.build().map_err(|e| err!(Internal; source: e))?;
    rt.block_on(async_run(config))
}

async fn async_run(config: Config) -> Result<i32, Error> {
    let catalog = Arc::new(RecordingCatalog::new(rusqlite::Connection::open(
        &config.db_path,
    )?));
    let streams_conn = rusqlite::Connection::open(&config.db_path)?;
    db::schema::init(&streams_conn)?;
    let streams = Arc::new(StreamStore::new(streams_conn));

    let ctx = RecorderCtx {
        storage_root: config.storage_root.clone(),
        streams: streams.clone(),
        catalog: catalog.clone(),
        registry: Arc::new(Registry::new()),
        opener: Arc::new(UnimplementedOpener),
        clocks: Arc::new(RealClocks {}),
    };
    let recorder = Arc::new(Recorder::new(ctx));

    for s in streams.list(MAX_STREAMS)? {
        if s.enabled && s.record {
            if let Err(e) = recorder.start(&s.name) {
                error!(stream = %s.name, exception = %e.chain(), "starting recorder");
            }
        }
    }

    let state = web::State {
        catalog: catalog.clone(),
        clocks: Arc::new(RealClocks {}),
        manifest_builder: Arc::new(ManifestBuilder::new(config.storage_root.clone())),
        dedup: Arc::new(Dedup::new()),
    };

    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let server = tokio::spawn(web::serve(config.http_addr, state, shutdown_rx));

    let mut int = signal(SignalKind::interrupt()).map_err(|e| err!(Internal; source: e))?;
    let mut term = signal(SignalKind::terminate()).map_err(|e| err!(Internal; source: e))?;
    tokio::select! {
        _ = int.recv() => info!("received SIGINT"),
        _ = term.recv() => info!("received SIGTERM"),
    }
    drop(shutdown_tx);

    info!("shutting down recorders");
    recorder.shutdown();

    if let Err(e) = server.await {
        warn!(exception = %e, "http server task panicked");
    }
    info!("exiting");
    Ok(0)
}
