//! Identity newtypes, lifecycle enums and flag sets shared by every component.
//!
//! # Key Types
//! - [`ProgramId`], [`ThreadId`], [`WindowHandle`]: opaque identities
//! - [`ProgramKind`], [`ModuleKind`], [`RootFunction`]: what is running and where
//! - [`InitReason`], [`UninitReason`]: canonical and host-reported lifecycle causes
//! - [`InitFlags`], [`DeinitFlags`]: opaque configuration bitsets
//! - [`DropHints`]: placement values reported by the host for a dropped program

use std::fmt;

use bitflags::bitflags;
use strum::{Display, EnumCount, EnumIter, FromRepr};

use crate::Result;

/// Dense identity of a program instance and index of its chain in the registry.
///
/// `ProgramId(0)` means "not yet attached to a chain". Ids are handed out in strictly
/// increasing order and are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProgramId(pub u32);

impl ProgramId {
    /// The unassigned id.
    pub const UNASSIGNED: ProgramId = ProgramId(0);

    /// Creates a program id from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        ProgramId(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the registry index of this id.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns true for the unassigned id 0.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for ProgramId {
    fn from(value: u32) -> Self {
        ProgramId(value)
    }
}

impl From<ProgramId> for u32 {
    fn from(id: ProgramId) -> Self {
        id.0
    }
}

impl fmt::Debug for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramId({})", self.0)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS thread identity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a visual host resource (a chart or its frame window).
///
/// Absence of a surface is modelled as `Option<WindowHandle>::None`, so a handle value is
/// never zero in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Kind of a program, i.e. of its main module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, FromRepr)]
#[repr(u32)]
pub enum ProgramKind {
    /// A chart indicator, recreated on every chart or parameter change.
    #[strum(serialize = "PT_INDICATOR")]
    Indicator = 1,
    /// An expert, which keeps its memory across chart and parameter changes.
    #[strum(serialize = "PT_EXPERT")]
    Expert = 2,
    /// A one-shot script without an init cycle.
    #[strum(serialize = "PT_SCRIPT")]
    Script = 4,
}

/// Kind of a loaded module. Main modules share the kind of their program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, FromRepr)]
#[repr(u32)]
pub enum ModuleKind {
    /// Main module of an indicator.
    #[strum(serialize = "MT_INDICATOR")]
    Indicator = 1,
    /// Main module of an expert.
    #[strum(serialize = "MT_EXPERT")]
    Expert = 2,
    /// Main module of a script.
    #[strum(serialize = "MT_SCRIPT")]
    Script = 4,
    /// A library loaded by a main module or by another library.
    #[strum(serialize = "MT_LIBRARY")]
    Library = 8,
}

impl From<ProgramKind> for ModuleKind {
    fn from(kind: ProgramKind) -> Self {
        match kind {
            ProgramKind::Indicator => ModuleKind::Indicator,
            ProgramKind::Expert => ModuleKind::Expert,
            ProgramKind::Script => ModuleKind::Script,
        }
    }
}

impl ModuleKind {
    /// Returns true for the main module kinds.
    #[must_use]
    pub fn is_main(&self) -> bool {
        !matches!(self, ModuleKind::Library)
    }
}

/// Lifecycle phase currently executing in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u32)]
pub enum RootFunction {
    /// `init()`
    #[strum(serialize = "RF_INIT")]
    Init = 1,
    /// `start()`, once per tick
    #[strum(serialize = "RF_START")]
    Start = 2,
    /// `deinit()`
    #[strum(serialize = "RF_DEINIT")]
    Deinit = 3,
}

/// Canonical cause of an initialize call, reconstructed from the host's signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, FromRepr)]
#[repr(u32)]
pub enum InitReason {
    /// Loaded manually by the user (first parameter input of a dropped program).
    #[strum(serialize = "IR_USER")]
    UserAdded = 1,
    /// Loaded by a template, also at host start.
    #[strum(serialize = "IR_TEMPLATE")]
    FromTemplate = 2,
    /// Loaded by another program via nested evaluation.
    #[strum(serialize = "IR_PROGRAM")]
    ProgramLoad = 3,
    /// Loaded by another program after the end of a test run.
    #[strum(serialize = "IR_PROGRAM_AFTERTEST")]
    ProgramLoadAfterTest = 4,
    /// Input parameters changed.
    #[strum(serialize = "IR_PARAMETERS")]
    ParametersChanged = 5,
    /// Chart period changed.
    #[strum(serialize = "IR_TIMEFRAMECHANGE")]
    TimeframeChanged = 6,
    /// Chart symbol changed.
    #[strum(serialize = "IR_SYMBOLCHANGE")]
    SymbolChanged = 7,
    /// Reloaded after recompilation.
    #[strum(serialize = "IR_RECOMPILE")]
    Recompiled = 8,
}

impl InitReason {
    /// Returns the raw value the hosted program understands.
    #[must_use]
    pub fn to_raw(self) -> u32 {
        self as u32
    }

    /// Returns true for the causes during which an indicator passes through limbo
    /// and must be restored from its master record.
    #[must_use]
    pub fn is_init_cycle(self) -> bool {
        matches!(
            self,
            InitReason::ParametersChanged
                | InitReason::TimeframeChanged
                | InitReason::SymbolChanged
        )
    }
}

/// Raw deinitialize cause as reported by the host.
///
/// The numbering follows the host's `REASON_*` constants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter, EnumCount, FromRepr,
)]
#[repr(u32)]
pub enum UninitReason {
    /// No previous deinit (first load), or a cause the host did not name.
    #[default]
    #[strum(serialize = "UR_UNDEFINED")]
    Undefined = 0,
    /// Program removed from its chart.
    #[strum(serialize = "UR_REMOVE")]
    Remove = 1,
    /// Program recompiled.
    #[strum(serialize = "UR_RECOMPILE")]
    Recompile = 2,
    /// Chart symbol or period changed.
    #[strum(serialize = "UR_CHARTCHANGE")]
    ChartChange = 3,
    /// Chart closed.
    #[strum(serialize = "UR_CHARTCLOSE")]
    ChartClose = 4,
    /// Input parameters changed.
    #[strum(serialize = "UR_PARAMETERS")]
    Parameters = 5,
    /// Account changed.
    #[strum(serialize = "UR_ACCOUNT")]
    Account = 6,
    /// A template was applied to the chart.
    #[strum(serialize = "UR_TEMPLATE")]
    Template = 7,
    /// `init()` returned a failure.
    #[strum(serialize = "UR_INITFAILED")]
    InitFailed = 8,
    /// The host is shutting down.
    #[strum(serialize = "UR_CLOSE")]
    Close = 9,
}

impl UninitReason {
    /// Converts a raw host value.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for values outside the host's range.
    pub fn from_raw(value: u32) -> Result<Self> {
        Self::from_repr(value)
            .ok_or_else(|| invalid_parameter!("invalid parameter uninitReason = {} (unknown)", value))
    }

    /// Returns the raw host value.
    #[must_use]
    pub fn to_raw(self) -> u32 {
        self as u32
    }

    /// Returns true for the causes after which an expert is re-entered with its memory intact.
    #[must_use]
    pub fn keeps_expert_state(self) -> bool {
        matches!(
            self,
            UninitReason::ChartChange | UninitReason::Parameters | UninitReason::Account
        )
    }
}

bitflags! {
    /// Init configuration of a program, copied verbatim from the host.
    ///
    /// The bits are defined by the hosted programs, so unknown bits are retained.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InitFlags: u32 {
        const _ = !0;
    }
}

bitflags! {
    /// Deinit configuration of a program, copied verbatim from the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeinitFlags: u32 {
        const _ = !0;
    }
}

/// Placement values the host reports for a program dropped onto a chart.
///
/// The host sets them to `-1` when the program was not dropped by the user; they are
/// unreliable in several builds and only serve as hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DropHints {
    /// Index of the chart sub-window the program was dropped on.
    pub on_chart: i32,
    /// Horizontal drop position.
    pub x: i32,
    /// Vertical drop position.
    pub y: i32,
}

impl Default for DropHints {
    fn default() -> Self {
        DropHints {
            on_chart: -1,
            x: -1,
            y: -1,
        }
    }
}

impl DropHints {
    /// Hints of a program the user dropped at the given position of the main chart window.
    #[must_use]
    pub fn dropped_at(x: i32, y: i32) -> Self {
        DropHints { on_chart: 0, x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_program_id() {
        let id = ProgramId::new(3);
        assert_eq!(id.value(), 3);
        assert_eq!(id.index(), 3);
        assert!(!id.is_unassigned());
        assert!(ProgramId::default().is_unassigned());
        assert_eq!(format!("{id}"), "3");
        assert_eq!(format!("{id:?}"), "ProgramId(3)");
        assert_eq!(u32::from(ProgramId::from(7)), 7);
    }

    #[test]
    fn test_uninit_reason_raw_values() {
        for reason in UninitReason::iter() {
            assert_eq!(UninitReason::from_raw(reason.to_raw()).unwrap(), reason);
        }
        assert_eq!(UninitReason::from_raw(3).unwrap(), UninitReason::ChartChange);
        assert!(UninitReason::from_raw(10).is_err());
        assert_eq!(UninitReason::COUNT, 10);
    }

    #[test]
    fn test_uninit_reason_keeps_expert_state() {
        let kept: Vec<_> = UninitReason::iter()
            .filter(|r| r.keeps_expert_state())
            .collect();
        assert_eq!(
            kept,
            vec![
                UninitReason::ChartChange,
                UninitReason::Parameters,
                UninitReason::Account
            ]
        );
    }

    #[test]
    fn test_init_reason_cycle() {
        assert!(InitReason::ParametersChanged.is_init_cycle());
        assert!(InitReason::SymbolChanged.is_init_cycle());
        assert!(InitReason::TimeframeChanged.is_init_cycle());
        assert!(!InitReason::ProgramLoadAfterTest.is_init_cycle());
        assert!(!InitReason::UserAdded.is_init_cycle());
        assert_eq!(InitReason::Recompiled.to_raw(), 8);
        assert_eq!(InitReason::SymbolChanged.to_string(), "IR_SYMBOLCHANGE");
    }

    #[test]
    fn test_module_kind_from_program_kind() {
        for kind in ProgramKind::iter() {
            let module = ModuleKind::from(kind);
            assert!(module.is_main());
            assert_eq!(module as u32, kind as u32);
        }
        assert!(!ModuleKind::Library.is_main());
    }

    #[test]
    fn test_flags_are_retained_verbatim() {
        let flags = InitFlags::from_bits_retain(0x8000_0042);
        assert_eq!(flags.bits(), 0x8000_0042);
        assert_eq!(DeinitFlags::from_bits_retain(5).bits(), 5);
    }

    #[test]
    fn test_drop_hints() {
        let hints = DropHints::default();
        assert_eq!(hints.on_chart, -1);
        assert_eq!(hints.x, -1);
        let hints = DropHints::dropped_at(120, 80);
        assert_eq!(hints.on_chart, 0);
        assert_eq!(hints.x, 120);
    }
}
