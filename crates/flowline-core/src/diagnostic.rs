//! Structured diagnostics and the receiver interface they are pushed to.
//!
//! Rendering and persistence belong to whoever implements
//! `DiagnosticHandler`; the engine only produces records.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::id::{OperatorIndex, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Byte range in the pipeline definition an issue refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpan {
    pub begin: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Note,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub kind: NoteKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceSpan>,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location: None,
            notes: Vec::new(),
        }
    }

    pub fn at(mut self, span: SourceSpan) -> Self {
        self.location = Some(span);
        self
    }

    pub fn note(mut self, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            kind: NoteKind::Note,
            message: message.into(),
        });
        self
    }

    pub fn hint(mut self, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            kind: NoteKind::Hint,
            message: message.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}", self.message)?;
        for note in &self.notes {
            let kind = match note.kind {
                NoteKind::Note => "note",
                NoteKind::Hint => "hint",
            };
            write!(f, "\n  = {kind}: {}", note.message)?;
        }
        Ok(())
    }
}

/// A diagnostic as forwarded by the runtime, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostic {
    pub run_id: RunId,
    pub operator: Option<(OperatorIndex, String)>,
    pub diagnostic: Diagnostic,
}

/// Receiver for diagnostics of one or more runs.
pub trait DiagnosticHandler: Send + Sync {
    fn emit(&self, diagnostic: RunDiagnostic);
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    inner: Mutex<Vec<RunDiagnostic>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RunDiagnostic> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<RunDiagnostic> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.diagnostic.is_error())
            .collect()
    }

    pub fn warnings(&self) -> Vec<RunDiagnostic> {
        self.snapshot()
            .into_iter()
            .filter(|d| !d.diagnostic.is_error())
            .collect()
    }
}

impl DiagnosticHandler for CollectingDiagnostics {
    fn emit(&self, diagnostic: RunDiagnostic) {
        if let Ok(mut v) = self.inner.lock() {
            v.push(diagnostic);
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl DiagnosticHandler for NullDiagnostics {
    fn emit(&self, _diagnostic: RunDiagnostic) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_notes() {
        let d = Diagnostic::warning("dropped 3 events")
            .note("schema `flow` changed")
            .hint("pin the schema");
        assert_eq!(
            d.to_string(),
            "warning: dropped 3 events\n  = note: schema `flow` changed\n  = hint: pin the schema"
        );
    }

    #[test]
    fn test_collecting_handler_splits_by_severity() {
        let handler = CollectingDiagnostics::new();
        let run_id = RunId::generate();
        for d in [Diagnostic::warning("w"), Diagnostic::error("e")] {
            handler.emit(RunDiagnostic {
                run_id,
                operator: None,
                diagnostic: d,
            });
        }
        assert_eq!(handler.errors().len(), 1);
        assert_eq!(handler.warnings().len(), 1);
        assert_eq!(handler.snapshot()[0].run_id, run_id);
    }
}
