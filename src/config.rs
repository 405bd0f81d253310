//! Configuration for the context synchronizer.
//!
//! Most options exist to let an embedding application adjust behavior the host is known
//! to get inconsistent across its releases, without changing the lifecycle protocol itself.

use bitflags::bitflags;

use crate::diagnostics::DEFAULT_DIAGNOSTICS_LIMIT;

bitflags! {
    /// Expert-derived fields copied onto a library record when it is reattached to a new
    /// expert chain after a test run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReattachFields: u8 {
        /// Copy the effective visual-mode flag.
        const VISUAL_MODE = 0b0000_0001;
        /// Copy the effective optimization flag.
        const OPTIMIZATION = 0b0000_0010;
        /// Copy the effective logging flag.
        const LOGGING = 0b0000_0100;
        /// Copy the custom log file.
        const CUSTOM_LOG_FILE = 0b0000_1000;
        /// Copy the display surface and its frame window.
        const SURFACE = 0b0001_0000;
    }
}

impl Default for ReattachFields {
    fn default() -> Self {
        ReattachFields::all()
    }
}

/// Configuration for [`crate::ContextSynchronizer`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Move libraries left mid-init-cycle by a previous test run to the new expert chain
    /// (default: true).
    pub reattach_libraries: bool,

    /// Fields copied from the new expert onto a reattached library (default: all).
    ///
    /// Whether the optimization flag should follow the expert is unconfirmed; remove
    /// [`ReattachFields::OPTIMIZATION`] to keep the library's own value.
    pub reattach_fields: ReattachFields,

    /// Effective logging status of top-level programs (default: true).
    pub default_logging: bool,

    /// Window title suffix marking a visual-mode test surface (default: `"(visual)"`).
    pub visual_title_marker: String,

    /// Number of tracked threads beyond which every new thread is reported (default: 512).
    pub thread_warn_threshold: usize,

    /// Slot capacity reserved for a new chain (default: 8).
    pub chain_capacity: usize,

    /// Number of diagnostics a synchronizer created from this configuration keeps
    /// (default: [`DEFAULT_DIAGNOSTICS_LIMIT`]).
    pub diagnostics_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reattach_libraries: true,
            reattach_fields: ReattachFields::all(),
            default_logging: true,
            visual_title_marker: "(visual)".to_string(),
            thread_warn_threshold: 512,
            chain_capacity: 8,
            diagnostics_limit: DEFAULT_DIAGNOSTICS_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables library reattachment.
    #[must_use]
    pub fn with_reattach_libraries(mut self, enabled: bool) -> Self {
        self.reattach_libraries = enabled;
        self
    }

    /// Sets the fields copied onto reattached libraries.
    #[must_use]
    pub fn with_reattach_fields(mut self, fields: ReattachFields) -> Self {
        self.reattach_fields = fields;
        self
    }

    /// Sets the effective logging status of top-level programs.
    #[must_use]
    pub fn with_default_logging(mut self, enabled: bool) -> Self {
        self.default_logging = enabled;
        self
    }

    /// Sets the visual-mode title suffix.
    #[must_use]
    pub fn with_visual_title_marker(mut self, marker: impl Into<String>) -> Self {
        self.visual_title_marker = marker.into();
        self
    }

    /// Sets the tracked-thread count beyond which new threads are reported.
    #[must_use]
    pub fn with_thread_warn_threshold(mut self, threshold: usize) -> Self {
        self.thread_warn_threshold = threshold;
        self
    }

    /// Sets the slot capacity reserved for new chains.
    #[must_use]
    pub fn with_chain_capacity(mut self, capacity: usize) -> Self {
        self.chain_capacity = capacity.max(2);
        self
    }

    /// Sets the number of diagnostics kept.
    #[must_use]
    pub fn with_diagnostics_limit(mut self, limit: usize) -> Self {
        self.diagnostics_limit = limit;
        self
    }
}
