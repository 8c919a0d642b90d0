//! Structured diagnostics collaborator.
//!
//! The driver never formats user-facing messages itself; it hands structured
//! reports to a [`DiagnosticSink`]. The backend reports exactly four kinds,
//! all of which abort the run that raised them. Frontend collaborators own
//! their own reporting and never go through this sink.

use std::fmt;

/// The diagnostic kinds this backend can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The target triple matched no registered backend.
    UnknownTarget,
    /// The target resolved but rejected the machine-construction parameters.
    TargetMachineCreationFailed,
    /// The output destination could not be opened or written.
    OutputOpenFailed,
    /// The target could not provide the requested emission steps.
    CodegenInitializationFailed,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::UnknownTarget => "unknown target",
            DiagnosticKind::TargetMachineCreationFailed => "target machine creation failed",
            DiagnosticKind::OutputOpenFailed => "cannot open output file",
            DiagnosticKind::CodegenInitializationFailed => "cannot initialize code generation",
        };
        f.write_str(name)
    }
}

/// One structured failure report.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Payload detail, e.g. the offending triple or the resolver's own text.
    pub message: String,
    /// Optional location payload, e.g. the output path involved.
    pub location: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Receiver for structured failure reports. Not owned by the pipeline.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Sink that prints each report to stderr, for command-line use.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        log::debug!("diagnostic: {:?} {}", diagnostic.kind, diagnostic.message);
        eprintln!("error: {diagnostic}");
    }
}

/// Sink that retains every report, for tests and embedding callers.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<DiagnosticKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}
