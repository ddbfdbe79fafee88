// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process configuration (§4.J): a small TOML file loaded once at startup.

use base::{err, Error};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

fn default_http_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("default bind address parses")
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Directory holding per-stream recording subdirectories and generated
    /// timeline manifests.
    pub storage_root: PathBuf,

    /// Path to the SQLite3 catalog database.
    pub db_path: PathBuf,

    /// Address the HTTP surface (§6) binds to.
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Worker thread count for the async runtime; defaults to the number
    /// of cores on the system when absent.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            err!(NotFound, "reading config file {}: {e}", path.display())
        })?;
        toml::from_str(&text)
            .map_err(|e| err!(InvalidArgument, "parsing config file {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_default_http_addr() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sentry-nvr.toml");
        std::fs::write(
            &path,
            "storage_root = \"/var/lib/sentry-nvr\"\ndb_path = \"/var/lib/sentry-nvr/catalog.db\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.http_addr, default_http_addr());
        assert_eq!(config.worker_threads, None);
    }

    #[test]
    fn explicit_http_addr_and_worker_threads_are_honored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sentry-nvr.toml");
        std::fs::write(
            &path,
            "storage_root = \"/var/lib/sentry-nvr\"\n\
             db_path = \"/var/lib/sentry-nvr/catalog.db\"\n\
             http_addr = \"127.0.0.1:9090\"\n\
             worker_threads = 4\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.worker_threads, Some(4));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Config::load(Path::new("/nonexistent/sentry-nvr.toml")).unwrap_err();
        assert_eq!(err.kind(), base::ErrorKind::NotFound);
    }
}
