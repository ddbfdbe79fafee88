// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Logic for setting up a `tracing` subscriber according to our preferences.

use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

fn build_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .with_env_var("SENTRY_NVR_LOG")
        .from_env_lossy()
}

/// Custom panic hook that logs through `tracing` instead of writing
/// directly to stderr, so a panic ends up in the same log stream (and
/// format) as everything else.
fn panic_hook(p: &std::panic::PanicHookInfo) {
    let payload: Option<&str> = if let Some(s) = p.payload().downcast_ref::<&str>() {
        Some(*s)
    } else if let Some(s) = p.payload().downcast_ref::<String>() {
        Some(s)
    } else {
        None
    };
    error!(
        target: std::env!("CARGO_CRATE_NAME"),
        location = p.location().map(tracing::field::display),
        payload = payload.map(tracing::field::display),
        backtrace = %std::backtrace::Backtrace::force_capture(),
        "panic",
    );
}

/// Installs the process-wide `tracing` subscriber. Call once from `main`.
///
/// `SENTRY_NVR_LOG` controls the filter (same syntax as `RUST_LOG`).
/// `SENTRY_NVR_FORMAT=json` switches to structured JSON output; anything
/// else (including unset) uses the human-readable default.
pub fn install() {
    let filter = build_filter();

    match std::env::var("SENTRY_NVR_FORMAT") {
        Ok(s) if s == "json" => {
            let sub = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .json()
                    .with_filter(filter),
            );
            tracing::subscriber::set_global_default(sub).unwrap();
        }
        _ => {
            let sub = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .with_filter(filter),
            );
            tracing::subscriber::set_global_default(sub).unwrap();
        }
    }

    let use_panic_hook = std::env::var("SENTRY_NVR_PANIC_HOOK")
        .map(|s| s != "false" && s != "0")
        .unwrap_or(true);
    if use_panic_hook {
        std::panic::set_hook(Box::new(&panic_hook));
    }
}

/// Installs a subscriber suitable for `cargo test`: writes through the test
/// harness's captured-output writer rather than raw stderr.
pub fn install_for_tests() {
    let filter = build_filter();
    let sub = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::Layer::new()
            .with_test_writer()
            .with_thread_names(true)
            .with_filter(filter),
    );
    let _ = tracing::subscriber::set_global_default(sub);
}
