//! Diagnostics collection for lifecycle operations.
//!
//! Every failed lifecycle call, every skipped chain slot and every other noteworthy event
//! is reported through a shared [`Diagnostics`] collector. Reporting never fails and never
//! aborts the caller. Each entry is kept for later inspection and is also emitted as a
//! `tracing` event, so an application that installs a subscriber sees the same stream live.
//!
//! # Key Components
//!
//! - [`Diagnostics`] - Thread-safe container for diagnostic entries
//! - [`Diagnostic`] - Individual entry with severity, code, attribution and source location
//! - [`DiagnosticSeverity`] - Severity level (Debug, Warning, Error)
//! - [`DiagnosticCategory`] - Component that reported the entry
//!
//! # Thread Safety
//!
//! The container uses `boxcar::Vec` internally, which provides lock-free concurrent append
//! operations. Lifecycle calls on different threads report without coordinating.
//!
//! # Retention
//!
//! A collector stores at most [`Diagnostics::limit`] entries. Once full, further entries
//! are still emitted as `tracing` events but only counted, see [`Diagnostics::dropped`].
//! A host that keeps failing the same call every tick therefore cannot grow it without
//! bound. [`Diagnostics::take`] empties an exclusively owned collector.
//!
//! ```rust
//! use ctxsync::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};
//! use ctxsync::ProgramId;
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.push(
//!     Diagnostic::new(
//!         DiagnosticSeverity::Warning,
//!         DiagnosticCategory::Synchronizer,
//!         "library slot 3 of program 2 is empty, skipping",
//!     )
//!     .with_program(ProgramId::new(2)),
//! );
//!
//! assert!(diagnostics.has_warnings());
//! assert_eq!(diagnostics.by_program(ProgramId::new(2)).len(), 1);
//! ```

use std::{
    fmt::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use strum::Display;

use crate::{context::ProgramId, Error};

/// Severity level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum DiagnosticSeverity {
    /// Trace-level detail, e.g. tracker growth.
    #[strum(serialize = "DEBUG")]
    Debug,
    /// Something unexpected was skipped; the operation still completed.
    #[strum(serialize = "WARN")]
    Warning,
    /// A lifecycle operation failed.
    #[strum(serialize = "ERROR")]
    Error,
}

/// Component that reported a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DiagnosticCategory {
    /// Chain table and slot bookkeeping.
    Registry,
    /// Thread/program map.
    Tracker,
    /// Init-reason decisions.
    Resolver,
    /// Main-module and library synchronization.
    Synchronizer,
    /// Deinit-exit slot release.
    Release,
}

/// A single diagnostic entry with context information.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level of this diagnostic.
    pub severity: DiagnosticSeverity,
    /// Component that reported this diagnostic.
    pub category: DiagnosticCategory,
    /// Machine-readable code, the [`crate::ErrorKind`] name for failures.
    pub code: Option<String>,
    /// Human-readable description of the issue.
    pub message: String,
    /// Program the acting thread was executing when the entry was reported.
    pub program: Option<ProgramId>,
    /// Source location `(file, line)` the entry originates from.
    pub location: Option<(&'static str, u32)>,
}

impl Diagnostic {
    /// Creates a new diagnostic entry.
    ///
    /// # Arguments
    ///
    /// * `severity` - Severity level of the diagnostic
    /// * `category` - Reporting component
    /// * `message` - Human-readable description
    pub fn new(
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            code: None,
            message: message.into(),
            program: None,
            location: None,
        }
    }

    /// Creates an error-level entry describing `error`, carrying its code and source location.
    pub fn from_error(category: DiagnosticCategory, error: &Error) -> Self {
        let message = error
            .message()
            .map_or_else(|| error.to_string(), str::to_string);

        Self {
            severity: DiagnosticSeverity::Error,
            category,
            code: Some(error.kind().to_string()),
            message,
            program: None,
            location: error.location(),
        }
    }

    /// Attributes the diagnostic to a program; the unassigned id is ignored.
    #[must_use]
    pub fn with_program(mut self, program: ProgramId) -> Self {
        if !program.is_unassigned() {
            self.program = Some(program);
        }
        self
    }

    /// Adds a diagnostic code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Adds source location information.
    #[must_use]
    pub fn with_location(mut self, file: &'static str, line: u32) -> Self {
        self.location = Some((file, line));
        self
    }

    fn emit(&self) {
        let program = self.program.map_or(0, |id| id.value());
        let code = self.code.as_deref().unwrap_or("");
        let (file, line) = self.location.unwrap_or(("", 0));

        match self.severity {
            DiagnosticSeverity::Debug => tracing::debug!(
                program_id = program,
                category = %self.category,
                code,
                file,
                line,
                "{}",
                self.message
            ),
            DiagnosticSeverity::Warning => tracing::warn!(
                program_id = program,
                category = %self.category,
                code,
                file,
                line,
                "{}",
                self.message
            ),
            DiagnosticSeverity::Error => tracing::error!(
                program_id = program,
                category = %self.category,
                code,
                file,
                line,
                "{}",
                self.message
            ),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.category)?;
        if let Some(code) = &self.code {
            write!(f, " {code}")?;
        }
        write!(f, ": {}", self.message)?;

        if let Some(program) = self.program {
            write!(f, " (program: {program})")?;
        }

        if let Some((file, line)) = self.location {
            write!(f, " ({file}:{line})")?;
        }

        Ok(())
    }
}

/// Number of entries a collector keeps by default.
pub const DEFAULT_DIAGNOSTICS_LIMIT: usize = 4096;

/// Thread-safe container for collecting diagnostic entries.
///
/// Uses `boxcar::Vec` internally for lock-free concurrent append operations.
#[derive(Debug)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
    limit: usize,
    reserved: AtomicUsize,
    dropped: AtomicUsize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates a new empty diagnostics container keeping [`DEFAULT_DIAGNOSTICS_LIMIT`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_DIAGNOSTICS_LIMIT)
    }

    /// Creates a new empty diagnostics container keeping at most `limit` entries.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: boxcar::Vec::new(),
            limit,
            reserved: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Maximum number of stored entries.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of entries that were emitted but not stored because the collector was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Removes and returns all stored entries and resets the dropped counter.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        let entries = std::mem::take(&mut self.entries);
        *self.reserved.get_mut() = 0;
        *self.dropped.get_mut() = 0;
        entries.into_iter().collect()
    }

    /// Adds a debug diagnostic.
    pub fn debug(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Debug, category, message));
    }

    /// Adds a warning diagnostic.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(
            DiagnosticSeverity::Warning,
            category,
            message,
        ));
    }

    /// Adds an error diagnostic.
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(
            DiagnosticSeverity::Error,
            category,
            message,
        ));
    }

    /// Emits the entry as a `tracing` event and stores it if the limit allows.
    pub fn push(&self, diagnostic: Diagnostic) {
        diagnostic.emit();

        let reserved = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            });
        match reserved {
            Ok(_) => {
                self.entries.push(diagnostic);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Returns true if any diagnostics have been collected.
    pub fn has_any(&self) -> bool {
        self.entries.count() > 0
    }

    /// Returns true if any error-level diagnostics have been collected.
    pub fn has_errors(&self) -> bool {
        self.count_of(DiagnosticSeverity::Error) > 0
    }

    /// Returns true if any warning-level diagnostics have been collected.
    pub fn has_warnings(&self) -> bool {
        self.count_of(DiagnosticSeverity::Warning) > 0
    }

    /// Returns the total number of diagnostics.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Returns the number of error-level diagnostics.
    pub fn error_count(&self) -> usize {
        self.count_of(DiagnosticSeverity::Error)
    }

    /// Returns the number of warning-level diagnostics.
    pub fn warning_count(&self) -> usize {
        self.count_of(DiagnosticSeverity::Warning)
    }

    fn count_of(&self, severity: DiagnosticSeverity) -> usize {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == severity)
            .count()
    }

    /// Returns an iterator over all diagnostics in report order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Returns the most recently reported diagnostic.
    pub fn last(&self) -> Option<&Diagnostic> {
        self.iter().last()
    }

    /// Returns all errors as a vector.
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .collect()
    }

    /// Returns all warnings as a vector.
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.severity == DiagnosticSeverity::Warning)
            .collect()
    }

    /// Returns diagnostics filtered by category.
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }

    /// Returns diagnostics attributed to `program`.
    pub fn by_program(&self, program: ProgramId) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.program == Some(program)).collect()
    }

    /// Formats a summary of all warnings and errors.
    pub fn summary(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "Diagnostics: {} error(s), {} warning(s)",
            self.error_count(),
            self.warning_count()
        );
        if self.dropped() > 0 {
            let _ = writeln!(output, "  ({} more not kept)", self.dropped());
        }

        for diag in self
            .iter()
            .filter(|d| d.severity > DiagnosticSeverity::Debug)
        {
            let _ = writeln!(output, "  {diag}");
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
