//! Logging setup.
//!
//! Grounded on the teacher's `app::logger`: `log` macros at call sites
//! throughout the crate, a `tracing-subscriber` `fmt` layer with an
//! `EnvFilter` as the process-wide subscriber. The teacher's syslog branch is
//! dropped here — this crate is a library embedded in a mail server, not a
//! standalone daemon, so it has no business picking a log sink; see
//! DESIGN.md.
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a default `tracing-subscriber` subscriber that also captures the
/// `log` macros used throughout this crate. Embedding applications that
/// already run their own subscriber should skip this and just ensure `log`
/// records are routed somewhere (e.g. via `tracing-log`).
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_default() {
    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
