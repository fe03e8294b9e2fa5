//! Ambient structured logging setup.
//!
//! Grounded on the teacher's `tracing_subscriber::fmt::init()` call sites
//! (e.g. `src/bin/agentic_server.rs`) and on `bpmn_integration::worker`'s
//! structured `tracing::info!` calls carrying a `worker_id = %...` field for
//! correlation, generalized here into an `EnvFilter`-driven subscriber plus
//! a writer that never lets a secret reach the log sink (spec §7:
//! "redaction applies to every string written to the log sink").

use crate::config::env_vars;
use crate::secrets::Redactor;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Install a global `tracing` subscriber honoring `LOG_LEVEL`
/// (`RUST_LOG`-style directives, default `info`), writing through a
/// [`RedactingWriter`]. Call once at startup; the returned writer is the
/// same one every subsequent log line is formatted into, so registering a
/// lease's secrets with it (see [`RedactingWriter::register_secrets`])
/// masks them out of every line the global subscriber emits from then on,
/// not just the error message folded into the terminal report.
pub fn init() -> Arc<RedactingWriter> {
    let filter = std::env::var(env_vars::LOG_LEVEL)
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let writer = Arc::new(RedactingWriter::new());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer((*writer).clone())
        .init();

    writer
}

/// `tracing_subscriber::fmt::MakeWriter` that masks every secret value seen
/// so far out of each formatted log line before it reaches stdout. Shared
/// process-wide across all concurrently executing leases, so secrets are
/// only ever added to the registered set, never swapped out — an
/// in-flight lease's secrets can't be un-registered mid-write by another
/// lease finishing, which a swap-based design would risk (spec §3/§7:
/// "redaction applies to every string written to the log sink").
#[derive(Clone, Default)]
pub struct RedactingWriter {
    redactor: Arc<Mutex<Redactor>>,
}

impl RedactingWriter {
    pub fn new() -> Self {
        Self {
            redactor: Arc::new(Mutex::new(Redactor::empty())),
        }
    }

    /// Merge a lease's resolved secrets into the process-wide masked set.
    /// Called once per lease, right after secret resolution, before the
    /// executor subprocess (whose stderr may echo them) is spawned.
    pub fn register_secrets(&self, redactor: &Redactor) {
        let mut guard = self.redactor.lock().expect("redactor lock poisoned");
        guard.merge(redactor);
    }
}

impl RedactingWriter {
    /// Mask `buf` against the currently registered secrets. Split out of
    /// `Write::write` so tests can assert on the redacted bytes directly
    /// instead of only the byte count `Write::write` is contractually
    /// required to return regardless of what redaction did.
    fn redact_bytes(&self, buf: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(buf);
        let redactor = self.redactor.lock().expect("redactor lock poisoned");
        redactor.redact(&text).into_bytes()
    }
}

impl Write for RedactingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let redacted = self.redact_bytes(buf);
        std::io::stdout().write_all(&redacted)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RedactingWriter {
    type Writer = RedactingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn redacting_writer_masks_secret_values() {
        let writer = RedactingWriter::new();
        let mut secrets = HashMap::new();
        secrets.insert("api_key".to_string(), "s3cr3t-value".to_string());
        writer.register_secrets(&Redactor::new(&secrets));

        let redacted = writer.redact_bytes(b"connecting with s3cr3t-value now");
        let redacted = String::from_utf8(redacted).unwrap();
        assert!(!redacted.contains("s3cr3t-value"));
        assert!(redacted.contains("***REDACTED***"));
    }

    #[test]
    fn redacting_writer_is_noop_with_no_secrets() {
        let writer = RedactingWriter::new();
        let redacted = writer.redact_bytes(b"plain log line");
        assert_eq!(redacted, b"plain log line");
    }
}
