//! Diagnostics on stderr, off unless requested.
//!
//! stdout carries `--json` events, and the human progress line redraws itself
//! in place with `\r`, so unrequested log lines would corrupt both. `serve`
//! also logs every applied byte at debug level.

const LOADER_LOG_ENV: &str = "SERIAL_HEX_LOADER_LOG";

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn init_tracing() {
    let filter = filter_from(
        std::env::var("RUST_LOG").ok(),
        std::env::var(LOADER_LOG_ENV).ok(),
    );
    let Some(filter) = filter else {
        return;
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// A non-empty `RUST_LOG` is used as is. Otherwise `SERIAL_HEX_LOADER_LOG`
/// enables this crate's logs at the level it names, `info` for anything else.
fn filter_from(rust_log: Option<String>, loader_log: Option<String>) -> Option<String> {
    if let Some(f) = rust_log.filter(|s| !s.trim().is_empty()) {
        return Some(f);
    }

    let requested = loader_log?.trim().to_ascii_lowercase();
    let level = LEVELS
        .iter()
        .find(|&&l| l == requested)
        .copied()
        .unwrap_or("info");
    Some(format!("serial_hex_loader={level}"))
}
