//! The init-reason resolver.
//!
//! The host tells a program *why it was deinitialized* last time, and only that. Why it is
//! being initialized now has to be reconstructed from the uninit cause, the host build,
//! whether the program runs nested in another program, the test flags and the drop hints.
//! For indicators that pass through limbo the registry is consulted as well.
//!
//! Resolution is a pure function of an [`InitRequest`] and a read-only [`RegistryView`],
//! so it can be exercised against a fake registry.
//!
//! # Examples
//!
//! ```rust
//! use ctxsync::resolver::{InitReasonResolver, InitRequest};
//! use ctxsync::{ContextRegistry, InitReason, ProgramKind, UninitReason};
//!
//! let registry = ContextRegistry::new();
//! let resolver = InitReasonResolver::new(&registry);
//!
//! let request = InitRequest {
//!     uninit_reason: UninitReason::Recompile,
//!     ..InitRequest::new(ProgramKind::Expert, "MovingAverage", "EURUSD")
//! };
//! let resolution = resolver.resolve(&request)?;
//! assert_eq!(resolution.reason, InitReason::Recompiled);
//! # Ok::<(), ctxsync::Error>(())
//! ```

pub mod builds;

use crate::{
    context::{
        DropHints, InitReason, ProgramId, ProgramKind, ThreadId, UninitReason, WindowHandle,
    },
    registry::{ContextRegistry, LimboQuery},
    Result,
};

use builds::{has_quirk, HostQuirk};

/// Read-only access to the registry as needed by the resolver.
pub trait RegistryView {
    /// Symbol stored in the master record of `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for an unknown id.
    fn master_symbol(&self, id: ProgramId) -> Result<String>;

    /// Tick count stored in the master record of `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] for an unknown id.
    fn master_ticks(&self, id: ProgramId) -> Result<u32>;

    /// Finds an indicator in limbo matching `query`.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] on a poisoned registry.
    fn find_indicator_in_limbo(&self, query: &LimboQuery<'_>) -> Result<Option<ProgramId>>;
}

impl RegistryView for ContextRegistry {
    fn master_symbol(&self, id: ProgramId) -> Result<String> {
        let chain = self.chain(id)?;
        let master = read_lock!(chain.master());
        Ok(master.symbol.clone())
    }

    fn master_ticks(&self, id: ProgramId) -> Result<u32> {
        let chain = self.chain(id)?;
        let master = read_lock!(chain.master());
        Ok(master.ticks)
    }

    fn find_indicator_in_limbo(&self, query: &LimboQuery<'_>) -> Result<Option<ProgramId>> {
        ContextRegistry::find_indicator_in_limbo(self, query)
    }
}

/// Everything the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct InitRequest<'a> {
    /// Kind of the program being initialized.
    pub program_kind: ProgramKind,
    /// Id already carried by the record, unassigned for a fresh record.
    pub program_id: ProgramId,
    /// Program name.
    pub program_name: &'a str,
    /// Uninit cause reported by the host.
    pub uninit_reason: UninitReason,
    /// Current symbol.
    pub symbol: &'a str,
    /// True if the program runs nested in another program.
    pub nested: bool,
    /// Raw testing flag.
    pub testing: bool,
    /// Raw visual-mode flag.
    pub visual_mode: bool,
    /// True if the call runs on the UI thread.
    pub on_ui_thread: bool,
    /// The host's UI thread.
    pub ui_thread: ThreadId,
    /// Host build number.
    pub build: u32,
    /// Display surface as passed by the host.
    pub surface: Option<WindowHandle>,
    /// Drop placement hints.
    pub drop: DropHints,
}

impl<'a> InitRequest<'a> {
    /// A request for a fresh, top-level program on the UI thread of a current host build.
    #[must_use]
    pub fn new(program_kind: ProgramKind, program_name: &'a str, symbol: &'a str) -> Self {
        InitRequest {
            program_kind,
            program_id: ProgramId::UNASSIGNED,
            program_name,
            uninit_reason: UninitReason::Undefined,
            symbol,
            nested: false,
            testing: false,
            visual_mode: false,
            on_ui_thread: true,
            ui_thread: ThreadId::default(),
            build: u32::MAX,
            surface: None,
            drop: DropHints::default(),
        }
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The canonical init cause.
    pub reason: InitReason,
    /// Chain of the limbo indicator this record resurrects, if one was found.
    pub original_id: Option<ProgramId>,
}

impl Resolution {
    fn plain(reason: InitReason) -> Self {
        Resolution {
            reason,
            original_id: None,
        }
    }
}

macro_rules! unexpected {
    ($req:expr) => {
        illegal_state!(
            "unexpected uninitReason {} (nested={} testing={} visualMode={} uiThread={} build={})",
            $req.uninit_reason,
            $req.nested,
            $req.testing,
            $req.visual_mode,
            $req.on_ui_thread,
            $req.build
        )
    };
}

/// Maps the host's signals to a canonical [`InitReason`].
#[derive(Debug)]
pub struct InitReasonResolver<'r, R: RegistryView + ?Sized> {
    registry: &'r R,
}

impl<'r, R: RegistryView + ?Sized> InitReasonResolver<'r, R> {
    /// Creates a resolver reading from `registry`.
    pub fn new(registry: &'r R) -> Self {
        InitReasonResolver { registry }
    }

    /// Resolves the init reason of `request`.
    ///
    /// # Errors
    /// - [`crate::Error::IllegalState`] for cause combinations the host never produces
    /// - [`crate::Error::RuntimeError`] if a chart change finds no indicator in limbo
    pub fn resolve(&self, request: &InitRequest<'_>) -> Result<Resolution> {
        match request.program_kind {
            ProgramKind::Indicator => self.indicator(request),
            ProgramKind::Expert => self.expert(request),
            ProgramKind::Script => Ok(Resolution::plain(InitReason::UserAdded)),
        }
    }

    fn limbo_query<'q>(&self, req: &InitRequest<'q>) -> LimboQuery<'q> {
        LimboQuery {
            ui_thread: req.ui_thread,
            surface: req.surface,
            program_name: req.program_name,
            uninit_reason: req.uninit_reason,
        }
    }

    fn indicator(&self, req: &InitRequest<'_>) -> Result<Resolution> {
        match req.uninit_reason {
            UninitReason::Parameters => {
                if req.nested {
                    return Err(unexpected!(req));
                }

                if !req.program_id.is_unassigned() {
                    let is_new = self.registry.master_ticks(req.program_id)? == 0;
                    let reason = if is_new {
                        InitReason::UserAdded
                    } else {
                        InitReason::ParametersChanged
                    };
                    return Ok(Resolution::plain(reason));
                }

                match self
                    .registry
                    .find_indicator_in_limbo(&self.limbo_query(req))?
                {
                    Some(id) => Ok(Resolution {
                        reason: InitReason::ParametersChanged,
                        original_id: Some(id),
                    }),
                    // first parameter input of a freshly dropped indicator
                    None => Ok(Resolution::plain(InitReason::UserAdded)),
                }
            }

            UninitReason::ChartChange => {
                if req.nested {
                    return Err(unexpected!(req));
                }

                let (id, original_id) = if req.program_id.is_unassigned() {
                    match self
                        .registry
                        .find_indicator_in_limbo(&self.limbo_query(req))?
                    {
                        Some(id) => (id, Some(id)),
                        None => {
                            return Err(runtime_error!(
                                "no {} indicator found in limbo during {}",
                                req.program_name,
                                req.uninit_reason
                            ))
                        }
                    }
                } else {
                    (req.program_id, None)
                };

                Ok(Resolution {
                    reason: self.chart_change(id, req.symbol)?,
                    original_id,
                })
            }

            UninitReason::Undefined => {
                if !req.nested {
                    if has_quirk(req.build, HostQuirk::TemplateOnUndefined) || req.drop.on_chart >= 0 {
                        return Ok(Resolution::plain(InitReason::FromTemplate));
                    }
                    return Ok(Resolution::plain(InitReason::UserAdded));
                }

                if req.testing && !req.visual_mode && req.on_ui_thread {
                    if has_quirk(req.build, HostQuirk::AfterTestOnUndefined) {
                        return Ok(Resolution::plain(InitReason::ProgramLoadAfterTest));
                    }
                    return Err(unexpected!(req));
                }
                Ok(Resolution::plain(InitReason::ProgramLoad))
            }

            UninitReason::Remove => {
                if !req.nested || !req.testing || !req.on_ui_thread {
                    return Err(unexpected!(req));
                }

                let quirk = if req.visual_mode {
                    HostQuirk::AfterTestOnRemoveVisual
                } else {
                    HostQuirk::AfterTestOnRemove
                };
                if has_quirk(req.build, quirk) {
                    return Ok(Resolution::plain(InitReason::ProgramLoadAfterTest));
                }
                Err(unexpected!(req))
            }

            UninitReason::Recompile => {
                if req.nested {
                    return Err(unexpected!(req));
                }
                Ok(Resolution::plain(InitReason::Recompiled))
            }

            UninitReason::ChartClose => {
                if !req.nested || !req.testing || !req.on_ui_thread {
                    return Err(unexpected!(req));
                }
                if has_quirk(req.build, HostQuirk::AfterTestOnChartClose) {
                    return Ok(Resolution::plain(InitReason::ProgramLoadAfterTest));
                }
                Err(unexpected!(req))
            }

            UninitReason::Account
            | UninitReason::Template
            | UninitReason::InitFailed
            | UninitReason::Close => Err(unexpected!(req)),
        }
    }

    fn expert(&self, req: &InitRequest<'_>) -> Result<Resolution> {
        let dropped = req.drop.x >= 0;
        let by_drop = if dropped {
            InitReason::UserAdded
        } else {
            InitReason::FromTemplate
        };

        let reason = match req.uninit_reason {
            UninitReason::Parameters => InitReason::ParametersChanged,

            UninitReason::ChartChange => {
                if req.program_id.is_unassigned() {
                    return Err(unexpected!(req));
                }
                self.chart_change(req.program_id, req.symbol)?
            }

            UninitReason::Recompile => InitReason::Recompiled,

            // old builds report a template load as chart close
            UninitReason::ChartClose => {
                if !has_quirk(req.build, HostQuirk::ChartCloseAsTemplate) {
                    return Err(unexpected!(req));
                }
                InitReason::UserAdded
            }

            UninitReason::Undefined => {
                if req.testing {
                    InitReason::UserAdded
                } else {
                    by_drop
                }
            }

            UninitReason::Remove => by_drop,

            UninitReason::Template => {
                if !has_quirk(req.build, HostQuirk::TemplateCause) {
                    return Err(unexpected!(req));
                }
                by_drop
            }

            UninitReason::Account | UninitReason::Close | UninitReason::InitFailed => {
                return Err(unexpected!(req))
            }
        };

        Ok(Resolution::plain(reason))
    }

    fn chart_change(&self, id: ProgramId, symbol: &str) -> Result<InitReason> {
        if self.registry.master_symbol(id)? == symbol {
            Ok(InitReason::TimeframeChanged)
        } else {
            Ok(InitReason::SymbolChanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashMap;

    /// Registry double with fixed masters and a fixed limbo answer.
    #[derive(Default)]
    struct FakeRegistry {
        masters: HashMap<ProgramId, (String, u32)>,
        limbo: Option<ProgramId>,
    }

    impl RegistryView for FakeRegistry {
        fn master_symbol(&self, id: ProgramId) -> Result<String> {
            self.masters
                .get(&id)
                .map(|(symbol, _)| symbol.clone())
                .ok_or_else(|| invalid_parameter!("invalid parameter programId = {}", id))
        }

        fn master_ticks(&self, id: ProgramId) -> Result<u32> {
            self.masters
                .get(&id)
                .map(|(_, ticks)| *ticks)
                .ok_or_else(|| invalid_parameter!("invalid parameter programId = {}", id))
        }

        fn find_indicator_in_limbo(&self, query: &LimboQuery<'_>) -> Result<Option<ProgramId>> {
            Ok(query.surface.and(self.limbo))
        }
    }

    fn fake(limbo: Option<u32>) -> FakeRegistry {
        let mut masters = HashMap::new();
        masters.insert(ProgramId::new(1), ("EURUSD".to_string(), 0));
        masters.insert(ProgramId::new(2), ("EURUSD".to_string(), 17));
        FakeRegistry {
            masters,
            limbo: limbo.map(ProgramId::new),
        }
    }

    fn indicator(uninit: UninitReason) -> InitRequest<'static> {
        InitRequest {
            uninit_reason: uninit,
            surface: Some(WindowHandle(0x10)),
            build: 1090,
            ..InitRequest::new(ProgramKind::Indicator, "ZigZag", "EURUSD")
        }
    }

    fn nested_test(uninit: UninitReason, build: u32, visual: bool) -> InitRequest<'static> {
        InitRequest {
            nested: true,
            testing: true,
            visual_mode: visual,
            build,
            ..indicator(uninit)
        }
    }

    fn reason(registry: &FakeRegistry, req: &InitRequest<'_>) -> Result<InitReason> {
        InitReasonResolver::new(registry)
            .resolve(req)
            .map(|r| r.reason)
    }

    #[test]
    fn test_script_is_always_user_added() {
        let registry = fake(None);
        for uninit in [UninitReason::Undefined, UninitReason::Close, UninitReason::Remove] {
            let req = InitRequest {
                uninit_reason: uninit,
                ..InitRequest::new(ProgramKind::Script, "Order", "EURUSD")
            };
            assert_eq!(reason(&registry, &req).unwrap(), InitReason::UserAdded);
        }
    }

    #[test]
    fn test_indicator_parameters() {
        let resolver_registry = fake(Some(2));
        let resolver = InitReasonResolver::new(&resolver_registry);

        // resurrection from limbo
        let found = resolver.resolve(&indicator(UninitReason::Parameters)).unwrap();
        assert_eq!(found.reason, InitReason::ParametersChanged);
        assert_eq!(found.original_id, Some(ProgramId::new(2)));

        // first parameter input of a dropped indicator
        let none = fake(None);
        let fresh = InitReasonResolver::new(&none)
            .resolve(&indicator(UninitReason::Parameters))
            .unwrap();
        assert_eq!(fresh.reason, InitReason::UserAdded);
        assert_eq!(fresh.original_id, None);

        // record with an id decides by its master's tick count
        let with_id = |id| InitRequest {
            program_id: ProgramId::new(id),
            ..indicator(UninitReason::Parameters)
        };
        assert_eq!(reason(&none, &with_id(1)).unwrap(), InitReason::UserAdded);
        assert_eq!(reason(&none, &with_id(2)).unwrap(), InitReason::ParametersChanged);

        let nested = InitRequest {
            nested: true,
            ..indicator(UninitReason::Parameters)
        };
        assert!(matches!(reason(&none, &nested), Err(Error::IllegalState { .. })));
    }

    #[test]
    fn test_indicator_chart_change() {
        let registry = fake(Some(2));
        let resolver = InitReasonResolver::new(&registry);

        let same_symbol = resolver.resolve(&indicator(UninitReason::ChartChange)).unwrap();
        assert_eq!(same_symbol.reason, InitReason::TimeframeChanged);
        assert_eq!(same_symbol.original_id, Some(ProgramId::new(2)));

        let other_symbol = InitRequest {
            symbol: "GBPUSD",
            ..indicator(UninitReason::ChartChange)
        };
        assert_eq!(
            resolver.resolve(&other_symbol).unwrap().reason,
            InitReason::SymbolChanged
        );

        let empty = fake(None);
        assert!(matches!(
            reason(&empty, &indicator(UninitReason::ChartChange)),
            Err(Error::RuntimeError { .. })
        ));

        let with_id = InitRequest {
            program_id: ProgramId::new(1),
            ..indicator(UninitReason::ChartChange)
        };
        let kept = InitReasonResolver::new(&empty).resolve(&with_id).unwrap();
        assert_eq!(kept.reason, InitReason::TimeframeChanged);
        assert_eq!(kept.original_id, None);
    }

    #[test]
    fn test_indicator_undefined() {
        let registry = fake(None);

        let old_build = InitRequest {
            build: 653,
            ..indicator(UninitReason::Undefined)
        };
        assert_eq!(reason(&registry, &old_build).unwrap(), InitReason::FromTemplate);

        let dropped = InitRequest {
            drop: DropHints::dropped_at(10, 10),
            ..indicator(UninitReason::Undefined)
        };
        assert_eq!(reason(&registry, &dropped).unwrap(), InitReason::FromTemplate);

        assert_eq!(
            reason(&registry, &indicator(UninitReason::Undefined)).unwrap(),
            InitReason::UserAdded
        );

        assert_eq!(
            reason(&registry, &nested_test(UninitReason::Undefined, 229, false)).unwrap(),
            InitReason::ProgramLoadAfterTest
        );
        assert!(reason(&registry, &nested_test(UninitReason::Undefined, 230, false)).is_err());
        assert_eq!(
            reason(&registry, &nested_test(UninitReason::Undefined, 230, true)).unwrap(),
            InitReason::ProgramLoad
        );

        let off_ui = InitRequest {
            on_ui_thread: false,
            ..nested_test(UninitReason::Undefined, 1090, false)
        };
        assert_eq!(reason(&registry, &off_ui).unwrap(), InitReason::ProgramLoad);
    }

    #[test]
    fn test_indicator_remove() {
        let registry = fake(None);

        assert!(reason(&registry, &indicator(UninitReason::Remove)).is_err());
        assert_eq!(
            reason(&registry, &nested_test(UninitReason::Remove, 388, false)).unwrap(),
            InitReason::ProgramLoadAfterTest
        );
        assert!(reason(&registry, &nested_test(UninitReason::Remove, 387, false)).is_err());
        assert!(reason(&registry, &nested_test(UninitReason::Remove, 577, true)).is_err());
        assert_eq!(
            reason(&registry, &nested_test(UninitReason::Remove, 600, true)).unwrap(),
            InitReason::ProgramLoadAfterTest
        );
        assert!(reason(&registry, &nested_test(UninitReason::Remove, 629, true)).is_err());

        let live = InitRequest {
            testing: false,
            ..nested_test(UninitReason::Remove, 400, false)
        };
        assert!(reason(&registry, &live).is_err());
    }

    #[test]
    fn test_indicator_recompile_and_chart_close() {
        let registry = fake(None);

        assert_eq!(
            reason(&registry, &indicator(UninitReason::Recompile)).unwrap(),
            InitReason::Recompiled
        );
        assert!(reason(&registry, &nested_test(UninitReason::Recompile, 1090, false)).is_err());

        assert!(reason(&registry, &indicator(UninitReason::ChartClose)).is_err());
        assert_eq!(
            reason(&registry, &nested_test(UninitReason::ChartClose, 633, true)).unwrap(),
            InitReason::ProgramLoadAfterTest
        );
        assert!(reason(&registry, &nested_test(UninitReason::ChartClose, 632, true)).is_err());
    }

    #[test]
    fn test_indicator_never_sees_host_only_causes() {
        let registry = fake(Some(1));
        for uninit in [
            UninitReason::Account,
            UninitReason::Template,
            UninitReason::InitFailed,
            UninitReason::Close,
        ] {
            let err = reason(&registry, &indicator(uninit)).unwrap_err();
            assert!(matches!(err, Error::IllegalState { .. }));
            assert!(err.message().unwrap().contains(&uninit.to_string()));
        }
    }

    fn expert(uninit: UninitReason) -> InitRequest<'static> {
        InitRequest {
            uninit_reason: uninit,
            build: 1090,
            ..InitRequest::new(ProgramKind::Expert, "MovingAverage", "EURUSD")
        }
    }

    #[test]
    fn test_expert_direct_mappings() {
        let registry = fake(None);
        assert_eq!(
            reason(&registry, &expert(UninitReason::Parameters)).unwrap(),
            InitReason::ParametersChanged
        );
        assert_eq!(
            reason(&registry, &expert(UninitReason::Recompile)).unwrap(),
            InitReason::Recompiled
        );
        for uninit in [UninitReason::Account, UninitReason::Close, UninitReason::InitFailed] {
            assert!(reason(&registry, &expert(uninit)).is_err());
        }
    }

    #[test]
    fn test_expert_chart_change_requires_id() {
        let registry = fake(None);
        assert!(matches!(
            reason(&registry, &expert(UninitReason::ChartChange)),
            Err(Error::IllegalState { .. })
        ));

        let timeframe = InitRequest {
            program_id: ProgramId::new(2),
            ..expert(UninitReason::ChartChange)
        };
        assert_eq!(reason(&registry, &timeframe).unwrap(), InitReason::TimeframeChanged);

        let symbol = InitRequest {
            symbol: "USDJPY",
            ..timeframe
        };
        assert_eq!(reason(&registry, &symbol).unwrap(), InitReason::SymbolChanged);
    }

    #[test]
    fn test_expert_drop_hints_and_builds() {
        let registry = fake(None);
        let dropped = DropHints::dropped_at(5, 5);

        assert_eq!(
            reason(&registry, &expert(UninitReason::Undefined)).unwrap(),
            InitReason::FromTemplate
        );
        let testing = InitRequest {
            testing: true,
            ..expert(UninitReason::Undefined)
        };
        assert_eq!(reason(&registry, &testing).unwrap(), InitReason::UserAdded);

        let removed = InitRequest {
            drop: dropped,
            ..expert(UninitReason::Remove)
        };
        assert_eq!(reason(&registry, &removed).unwrap(), InitReason::UserAdded);
        assert_eq!(
            reason(&registry, &expert(UninitReason::Remove)).unwrap(),
            InitReason::FromTemplate
        );

        assert_eq!(
            reason(&registry, &expert(UninitReason::Template)).unwrap(),
            InitReason::FromTemplate
        );
        let old_template = InitRequest {
            build: 509,
            ..expert(UninitReason::Template)
        };
        assert!(reason(&registry, &old_template).is_err());

        assert!(reason(&registry, &expert(UninitReason::ChartClose)).is_err());
        let old_close = InitRequest {
            build: 509,
            ..expert(UninitReason::ChartClose)
        };
        assert_eq!(reason(&registry, &old_close).unwrap(), InitReason::UserAdded);
    }

    #[test]
    fn test_resolver_against_real_registry() {
        let registry = ContextRegistry::new();
        let resolver = InitReasonResolver::new(&registry);
        let req = InitRequest {
            program_id: ProgramId::new(9),
            ..expert(UninitReason::ChartChange)
        };
        assert!(matches!(
            resolver.resolve(&req),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
