// Copyright 2025 The ctxsync Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # ctxsync
//!
//! Identity and lifecycle registry for program instances running inside a host process.
//!
//! The host loads programs (indicators, experts, scripts) and the libraries they use, and
//! drives them through `init()`, `start()` and `deinit()`. Between those calls the host is
//! free to erase a module's memory, reload it on another chart, or hand an instance over to
//! a different thread. `ctxsync` keeps one [`ExecutionContext`] per module instance and
//! makes sure an instance keeps its identity across all of that.
//!
//! ## Features
//!
//! - **Stable program ids** - every top-level instance gets an id that survives init cycles
//! - **Master mirroring** - the last known state of a program outlives its module memory
//! - **Canonical init reasons** - the host's ambiguous init signals resolved to one cause
//! - **Library reattachment** - libraries of a finished test run move to the next expert
//! - **Thread tracking** - which program each host thread executed last
//! - **Lock-poisoning safe** - every failure is an [`Error`], nothing panics
//!
//! ## Quick Start
//!
//! ```rust
//! use ctxsync::prelude::*;
//! use ctxsync::DropHints;
//! # use ctxsync::{host::SurfaceRequest, ThreadId, WindowHandle};
//! # struct Terminal;
//! # impl Host for Terminal {
//! #     fn build(&self) -> u32 { 1090 }
//! #     fn current_thread(&self) -> ThreadId { ThreadId(1) }
//! #     fn ui_thread(&self) -> ThreadId { ThreadId(1) }
//! #     fn locate_surface(&self, _: &SurfaceRequest<'_>) -> Result<Option<WindowHandle>> { Ok(None) }
//! #     fn surface_window(&self, _: WindowHandle) -> Option<WindowHandle> { None }
//! #     fn window_title(&self, _: WindowHandle) -> Option<String> { None }
//! # }
//!
//! let sync = ContextSynchronizer::new(Terminal);
//! let record = new_record();
//!
//! let args = MainInit {
//!     drop: DropHints::dropped_at(120, 80),
//!     ..MainInit::new(ProgramKind::Expert, "Grid", "EURUSD", 60)
//! };
//! let outcome = sync.main_init(&record, &args)?;
//! assert_eq!(outcome.init_reason, InitReason::UserAdded);
//!
//! sync.main_start(&record, 1_700_000_000)?;
//! sync.main_deinit(&record, UninitReason::Remove)?;
//! sync.leave_context(&record)?;
//! # Ok::<(), ctxsync::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`registry`] - chains of records per program id and the thread/program map
//! - [`resolver`] - canonical init reasons from raw host signals
//! - [`sync`] - the lifecycle entry points
//! - [`release`] - what happens at the very end of `deinit()`
//! - [`host`] - everything the crate needs from the hosting application
//! - [`diagnostics`] - warnings and errors collected along the way
//!
//! ## Logging
//!
//! Every diagnostic is also emitted as a `tracing` event. Install any `tracing` subscriber
//! to see them.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use ctxsync::prelude::*;
///
/// let record = new_record();
/// assert!(!record.read().unwrap().is_attached());
/// ```
pub mod prelude;

/// Synchronizer configuration
pub mod config;

/// Execution context records and the value types stored in them
pub mod context;

/// Collected warnings and errors
pub mod diagnostics;

/// Collaborators provided by the hosting application
pub mod host;

/// Chains of records and the thread/program map
pub mod registry;

/// Context release at the end of deinit
pub mod release;

/// Init reason resolution
pub mod resolver;

/// Lifecycle synchronization
pub mod sync;

/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ctxsync` Error type
///
/// ```rust
/// use ctxsync::{ContextRegistry, Error, ProgramId};
///
/// let registry = ContextRegistry::new();
/// match registry.chain(ProgramId::new(7)) {
///     Err(Error::InvalidParameter { message, .. }) => println!("{message}"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub use error::{Error, ErrorKind};

pub use config::{ReattachFields, SyncConfig};
pub use context::{
    new_record, ContextRc, ContextRef, DeinitFlags, DropHints, ExecutionContext, InitFlags,
    InitReason, LastError, ModuleKind, ProgramId, ProgramKind, RootFunction, ThreadId,
    UninitReason, WindowHandle,
};
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};
pub use host::Host;
pub use registry::{ContextChain, ContextRegistry};
pub use sync::{ContextSynchronizer, InitOutcome, LibraryInit, LibraryInitKind, MainInit};
