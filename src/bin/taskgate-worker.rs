//! Child-process worker for `ProcessBackend`.
//!
//! Reads JSON job lines on stdin, runs them against the builtin registry and
//! answers on stdout. Logs go to stderr, filtered by `RUST_LOG`.

use std::io::{self, BufWriter};
use std::process::ExitCode;

use taskgate::backend::process::serve;
use taskgate::executor::{PanicStrategy, Registry};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let registry = Registry::with_builtins();
    let stdin = io::stdin().lock();
    let stdout = BufWriter::new(io::stdout().lock());

    match serve(&registry, PanicStrategy::LogAndContinue, stdin, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "worker process failed");
            ExitCode::from(2)
        }
    }
}
