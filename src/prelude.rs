//! # ctxsync Prelude
//!
//! The types needed to drive program lifecycles, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ctxsync operations
pub use crate::Error;

/// The result type used throughout ctxsync
pub use crate::Result;

// ================================================================================================
// Records
// ================================================================================================

pub use crate::context::{
    new_record, ContextRc, ContextRef, ExecutionContext, InitReason, ModuleKind, ProgramId,
    ProgramKind, RootFunction, UninitReason,
};

// ================================================================================================
// Lifecycle
// ================================================================================================

pub use crate::config::SyncConfig;
pub use crate::host::Host;
pub use crate::registry::ContextRegistry;
pub use crate::sync::{ContextSynchronizer, HostFlags, LibraryInit, MainInit};
