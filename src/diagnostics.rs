//! Structured, per-entry diagnostics.
//!
//! spec §7 asks for warnings to flow "through a diagnostics channel
//! (structured, not a log string)" while the top-level caller still sees
//! a single result code. We carry a plain `Vec<Diagnostic>` on the
//! archive context for the caller to inspect, and mirror the same event
//! through `log`'s `warn!`/`debug!` macros so anyone just watching logs
//! (the way callers of the teacher crate already do) sees it too.

use crate::error::ArchiveError;
use std::fmt;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational; no data was lost.
    Info,
    /// Recoverable: an entry's metadata is incomplete or suspect, but
    /// the scan or write continued.
    Warning,
    /// The operation that produced this diagnostic aborted.
    Fatal,
}

/// One structured diagnostic event, optionally tied to a specific entry.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Index into the entry table this diagnostic concerns, if any.
    pub entry_index: Option<usize>,
    /// Display name of the affected entry, if any.
    pub entry_name: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry_name {
            Some(name) => write!(f, "[{:?}] {}: {}", self.severity, name, self.message),
            None => write!(f, "[{:?}] {}", self.severity, self.message),
        }
    }
}

/// An append-only collection of diagnostics produced during a scan or
/// write. Never cleared automatically; the caller owns it alongside the
/// `ArchiveContext`.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticChannel {
    events: Vec<Diagnostic>,
}

impl DiagnosticChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        match diag.severity {
            Severity::Info => log::debug!("{diag}"),
            Severity::Warning => log::warn!("{diag}"),
            Severity::Fatal => log::error!("{diag}"),
        }
        self.events.push(diag);
    }

    pub fn warn(&mut self, entry_index: Option<usize>, entry_name: Option<String>, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            entry_index,
            entry_name,
            message: message.into(),
        });
    }

    pub fn warn_error(&mut self, entry_index: Option<usize>, entry_name: Option<String>, err: &ArchiveError) {
        self.warn(entry_index, entry_name, err.to_string());
    }

    pub fn events(&self) -> &[Diagnostic] {
        &self.events
    }

    pub fn has_fatal(&self) -> bool {
        self.events.iter().any(|d| d.severity == Severity::Fatal)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
