//! Execution context records and the types they are built from.
//!
//! [`types`] holds the identity newtypes, lifecycle enums and opaque flag sets; [`record`]
//! holds the [`ExecutionContext`] itself together with the shared and non-owning handles
//! the registry, the synchronizer and the host pass around.

pub mod record;
pub mod types;

pub use record::{new_record, ContextRc, ContextRef, ExecutionContext, LastError};
pub use types::{
    DeinitFlags, DropHints, InitFlags, InitReason, ModuleKind, ProgramId, ProgramKind,
    RootFunction, ThreadId, UninitReason, WindowHandle,
};
