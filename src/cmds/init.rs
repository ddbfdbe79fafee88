// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `init` subcommand (§4.J): creates `storage_root` and an empty catalog
//! database at `db_path` if either is absent. Safe to run against an
//! already-initialized deployment.

use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::info;

/// Initializes a deployment's storage directory and catalog database.
#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    /// Path to the TOML configuration file.
    #[bpaf(long("config"), argument("PATH"))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = crate::config::Config::load(&args.config)?;

    std::fs::create_dir_all(&config.storage_root)?;
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = rusqlite::Connection::open(&config.db_path)?;
    db::schema::init(&conn)?;

    info!(
        storage_root = %config.storage_root.display(),
        db_path = %config.db_path.display(),
        "initialized",
    );
    Ok(0)
}
