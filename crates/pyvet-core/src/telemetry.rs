//! Log output for the `pyvet` binary.
//!
//! Lines go to stderr so stdout stays free for the run summary. `RUST_LOG`
//! replaces the default filter entirely.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events are shown at the pyvet verbosity.
const PYVET_TARGETS: [&str; 3] = ["pyvet", "pyvet_core", "pyvet_backend"];

/// Filter used when `RUST_LOG` is unset.
///
/// Dependencies (reqwest, hyper, ...) stay at `warn`; pyvet's own crates log
/// at `info`, or `debug` with `verbose`.
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives = vec!["warn".to_string()];
    directives.extend(PYVET_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

/// Install the global subscriber. Only the first call takes effect.
///
/// `json` emits newline-delimited JSON. `verbose` also shows event targets.
pub fn init_tracing(json: bool, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let layer = fmt::layer()
        .with_target(verbose)
        .with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}
