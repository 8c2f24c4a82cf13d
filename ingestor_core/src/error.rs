use std::sync::atomic::{AtomicBool, Ordering};

/// Whether to log verbose output (per-message lines, error cause chains).
/// Set from the `--debug` flag / `INGESTOR_DEBUG` env var.
static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Print an error and its cause chain, if verbose output is enabled.
pub fn debug_error(err: anyhow::Error) {
    if verbose() {
        eprintln!("Warn: {}", err);
        for cause in err.chain().skip(1) {
            eprintln!("Caused by: {}", cause);
        }
    }
}
