//! The execution context record and the references used to share it.
//!
//! One [`ExecutionContext`] exists per loaded module instance. The host owns the records
//! of main modules and libraries (its ephemeral memory, modelled as [`ContextRc`] handles
//! it holds on to), while the registry owns one master record per program. Chains and
//! super-context links only ever hold a [`ContextRef`], so dropping a record on the host
//! side turns every reference to it into an explicit "absent" state.

use std::sync::{Arc, RwLock, Weak};

use crate::{
    context::types::{
        DeinitFlags, InitFlags, InitReason, ModuleKind, ProgramId, ProgramKind, RootFunction,
        ThreadId, UninitReason, WindowHandle,
    },
    ErrorKind,
};

/// A shared, lockable execution context record
pub type ContextRc = Arc<RwLock<ExecutionContext>>;

/// Creates a fresh, zeroed record as the host hands it out for a newly loaded module.
#[must_use]
pub fn new_record() -> ContextRc {
    Arc::new(RwLock::new(ExecutionContext::default()))
}

/// A non-owning reference to a record
///
/// The referenced record's lifetime is governed by whoever holds the [`ContextRc`]
/// (the host for main and library records, the registry for masters), never by the
/// holder of this reference.
#[derive(Clone, Debug)]
pub struct ContextRef {
    weak_ref: Weak<RwLock<ExecutionContext>>,
}

impl ContextRef {
    /// Create a new `ContextRef` from a strong reference
    pub fn new(strong_ref: &ContextRc) -> Self {
        Self {
            weak_ref: Arc::downgrade(strong_ref),
        }
    }

    /// Get a strong reference to the record, returning None if the record has been released
    #[must_use]
    pub fn upgrade(&self) -> Option<ContextRc> {
        self.weak_ref.upgrade()
    }

    /// Check if the referenced record is still alive
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.weak_ref.strong_count() > 0
    }

    /// Returns true if this reference points at `record`
    #[must_use]
    pub fn points_to(&self, record: &ContextRc) -> bool {
        std::ptr::eq(self.weak_ref.as_ptr(), Arc::as_ptr(record))
    }
}

impl From<&ContextRc> for ContextRef {
    fn from(strong_ref: &ContextRc) -> Self {
        Self::new(strong_ref)
    }
}

/// Most recent error state of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastError {
    /// Last error raised by the hosted program's runtime.
    pub runtime: i32,
    /// Last error raised on the platform side by a lifecycle operation.
    pub platform: Option<ErrorKind>,
    /// Message of the last platform error.
    pub platform_msg: Option<String>,
    /// Last platform warning.
    pub warning: Option<ErrorKind>,
    /// Message of the last platform warning.
    pub warning_msg: Option<String>,
}

impl LastError {
    /// Resets all codes and messages.
    pub fn clear(&mut self) {
        *self = LastError::default();
    }

    /// Returns true if no error or warning is recorded.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        *self == LastError::default()
    }
}

/// The context of one loaded module instance.
///
/// All fields are public; the registry and the synchronizer are the only writers, the
/// hosted program reads them.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Identity of the owning program, 0 until attached to a chain.
    pub program_id: ProgramId,
    /// Kind of the owning program.
    pub program_kind: Option<ProgramKind>,
    /// Name of the owning program.
    pub program_name: String,
    /// Kind of this module.
    pub module_kind: Option<ModuleKind>,
    /// Name of this module (the program name for main modules).
    pub module_name: String,

    /// Lifecycle phase currently executing, `None` between phases.
    pub root_function: Option<RootFunction>,
    /// Set while the module is mid re-initialization and must be treated as surviving
    /// state rather than a fresh instance.
    pub init_cycle: bool,
    /// Canonical cause of the current init, `None` for libraries.
    pub init_reason: Option<InitReason>,
    /// Raw cause of the preceding deinit as reported by the host.
    pub uninit_reason: UninitReason,
    /// Init configuration.
    pub init_flags: InitFlags,
    /// Deinit configuration.
    pub deinit_flags: DeinitFlags,

    /// Current instrument.
    pub symbol: String,
    /// Current period in minutes.
    pub timeframe: u32,
    /// Number of ticks processed so far; 0 until the first `start()`.
    pub ticks: u32,
    /// Server time of the previous tick.
    pub previous_tick_time: i64,
    /// Server time of the current tick.
    pub current_tick_time: i64,
    /// OS thread owning the current call.
    pub thread_id: ThreadId,

    /// Effective test status.
    pub testing: bool,
    /// Effective visual test status.
    pub visual_mode: bool,
    /// Effective optimization status.
    pub optimization: bool,
    /// Effective logging status.
    pub logging: bool,
    /// Custom log file, if any.
    pub custom_log_file: Option<String>,

    /// Context of the program that loaded this one via nested evaluation.
    pub super_context: Option<ContextRef>,
    /// Display surface (chart) of the program.
    pub surface: Option<WindowHandle>,
    /// Frame window holding the display surface.
    pub surface_window: Option<WindowHandle>,

    /// Most recent errors.
    pub last_error: LastError,
}

impl ExecutionContext {
    /// Returns true if the record is attached to a chain.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.program_id.is_unassigned()
    }

    /// Returns true if this is a library record.
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.module_kind == Some(ModuleKind::Library)
    }

    /// Returns the live super-context, treating a released one as absent.
    #[must_use]
    pub fn live_super_context(&self) -> Option<ContextRc> {
        self.super_context.as_ref().and_then(ContextRef::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_unattached() {
        let record = new_record();
        let ctx = record.read().unwrap();
        assert!(!ctx.is_attached());
        assert!(ctx.root_function.is_none());
        assert!(ctx.last_error.is_clear());
        assert_eq!(ctx.uninit_reason, UninitReason::Undefined);
    }

    #[test]
    fn test_context_ref_identity() {
        let a = new_record();
        let b = new_record();
        let r = ContextRef::new(&a);

        assert!(r.points_to(&a));
        assert!(!r.points_to(&b));
        assert!(r.is_valid());
        assert!(Arc::ptr_eq(&r.upgrade().unwrap(), &a));
    }

    #[test]
    fn test_released_super_context_is_absent() {
        let parent = new_record();
        let child = new_record();
        child.write().unwrap().super_context = Some(ContextRef::new(&parent));
        assert!(child.read().unwrap().live_super_context().is_some());

        drop(parent);
        let ctx = child.read().unwrap();
        assert!(ctx.super_context.is_some());
        assert!(ctx.live_super_context().is_none());
    }

    #[test]
    fn test_last_error_clear() {
        let mut err = LastError {
            runtime: 4051,
            platform: Some(ErrorKind::IllegalState),
            platform_msg: Some("boom".into()),
            ..LastError::default()
        };
        assert!(!err.is_clear());
        err.clear();
        assert!(err.is_clear());
    }
}
