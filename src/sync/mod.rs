//! The context synchronizer.
//!
//! [`ContextSynchronizer`] is what the host's lifecycle entry points call. Every call
//! validates its arguments, records the acting thread in the tracker, and projects the
//! call into the module's [`ExecutionContext`]. Main module records are mirrored into the
//! chain's master so their state survives the host erasing the module's memory.
//!
//! # Main module protocol
//!
//! ```text
//! main_init ──► main_start (per tick) ──► main_deinit ──► leave_context
//!     ▲                                                        │
//!     └────────────── next init cycle (same or new record) ◄───┘
//! ```
//!
//! On `main_init` the synchronizer decides whether the record is a brand-new instance
//! (new chain), an indicator coming back from limbo (restored from its master), or an
//! already attached record. For a new expert in the tester it also moves libraries a
//! previous test run left behind onto the new chain.
//!
//! # Library protocol
//!
//! A library's first `library_init` copies the loading program's master and appends the
//! record to the loader's chain. Later inits either refresh it in place (indicator init
//! cycle on the UI thread) or mark it as pending reattachment (expert in the tester).
//!
//! # Failures
//!
//! No operation panics or aborts the process. A failing operation returns the error,
//! records one error diagnostic attributed to the program the current thread executed
//! last, and stores the error in the record's [`crate::context::LastError`].

pub mod flags;

use std::sync::Arc;

use crate::{
    config::{ReattachFields, SyncConfig},
    context::{
        ContextRc, ContextRef, DeinitFlags, DropHints, ExecutionContext, InitFlags, InitReason,
        ModuleKind, ProgramId, ProgramKind, RootFunction, UninitReason, WindowHandle,
    },
    diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
    host::{Host, SurfaceRequest},
    registry::{ContextRegistry, TrackedThread},
    release,
    resolver::{InitReasonResolver, InitRequest},
    Error, Result,
};

pub use flags::{EffectiveFlags, HostFlags};

/// Arguments of a main module's `init()`.
#[derive(Debug, Clone)]
pub struct MainInit<'a> {
    /// Kind of the program.
    pub program_kind: ProgramKind,
    /// Program name.
    pub program_name: &'a str,
    /// Uninit cause as reported by the host.
    pub uninit_reason: UninitReason,
    /// Init configuration.
    pub init_flags: InitFlags,
    /// Deinit configuration.
    pub deinit_flags: DeinitFlags,
    /// Current symbol.
    pub symbol: &'a str,
    /// Current timeframe in minutes.
    pub timeframe: u32,
    /// Context of the program this one runs nested in, possibly already released.
    pub super_context: Option<ContextRef>,
    /// Raw flags as reported by the host.
    pub flags: HostFlags,
    /// Display surface as reported by the host, possibly not yet set.
    pub surface: Option<WindowHandle>,
    /// Drop placement hints.
    pub drop: DropHints,
}

impl<'a> MainInit<'a> {
    /// Arguments of a top-level program's first init.
    #[must_use]
    pub fn new(
        program_kind: ProgramKind,
        program_name: &'a str,
        symbol: &'a str,
        timeframe: u32,
    ) -> Self {
        MainInit {
            program_kind,
            program_name,
            uninit_reason: UninitReason::Undefined,
            init_flags: InitFlags::empty(),
            deinit_flags: DeinitFlags::empty(),
            symbol,
            timeframe,
            super_context: None,
            flags: HostFlags::default(),
            surface: None,
            drop: DropHints::default(),
        }
    }
}

/// Result of a successful main module init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOutcome {
    /// Id of the program the record now belongs to.
    pub program_id: ProgramId,
    /// Canonical init cause.
    pub init_reason: InitReason,
    /// True if a new chain was created.
    pub new_chain: bool,
    /// Number of libraries moved over from a previous test run.
    pub reattached: usize,
}

/// Arguments of a library's `init()`.
#[derive(Debug, Clone, Copy)]
pub struct LibraryInit<'a> {
    /// Library name.
    pub module_name: &'a str,
    /// Uninit cause as reported by the host.
    pub uninit_reason: UninitReason,
    /// Init configuration.
    pub init_flags: InitFlags,
    /// Deinit configuration.
    pub deinit_flags: DeinitFlags,
    /// Current symbol.
    pub symbol: &'a str,
    /// Current timeframe in minutes.
    pub timeframe: u32,
    /// Raw optimization flag.
    pub optimization: bool,
}

impl<'a> LibraryInit<'a> {
    /// Arguments of a library init with an undefined uninit cause.
    #[must_use]
    pub fn new(module_name: &'a str, symbol: &'a str, timeframe: u32) -> Self {
        LibraryInit {
            module_name,
            uninit_reason: UninitReason::Undefined,
            init_flags: InitFlags::empty(),
            deinit_flags: DeinitFlags::empty(),
            symbol,
            timeframe,
            optimization: false,
        }
    }
}

/// How a library init was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryInitKind {
    /// First load; the record was appended to the loader's chain.
    FirstLoad {
        /// The loading program.
        program_id: ProgramId,
        /// Slot of the library in the loader's chain.
        slot: usize,
    },
    /// Init cycle of an indicator on the UI thread; refreshed in place.
    InitCycle,
    /// Init cycle of an expert in the tester; waits for the next expert to claim it.
    PendingReattachment,
}

/// Drives the lifecycle of all program instances of one host process.
#[derive(Debug)]
pub struct ContextSynchronizer<H: Host> {
    registry: Arc<ContextRegistry>,
    diagnostics: Arc<Diagnostics>,
    host: H,
    config: SyncConfig,
}

impl<H: Host> ContextSynchronizer<H> {
    /// Creates a synchronizer with a fresh registry and default configuration.
    pub fn new(host: H) -> Self {
        Self::with_config(host, SyncConfig::default())
    }

    /// Creates a synchronizer with a fresh registry.
    pub fn with_config(host: H, config: SyncConfig) -> Self {
        let registry = Arc::new(ContextRegistry::with_chain_capacity(config.chain_capacity));
        let diagnostics = Arc::new(Diagnostics::with_limit(config.diagnostics_limit));
        Self::with_parts(registry, diagnostics, host, config)
    }

    /// Creates a synchronizer on top of an existing registry and diagnostics collector.
    pub fn with_parts(
        registry: Arc<ContextRegistry>,
        diagnostics: Arc<Diagnostics>,
        host: H,
        config: SyncConfig,
    ) -> Self {
        ContextSynchronizer {
            registry,
            diagnostics,
            host,
            config,
        }
    }

    /// The registry.
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// The diagnostics collector.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronizes a main module record at the start of `init()`.
    ///
    /// # Errors
    /// - [`Error::InvalidParameter`] for empty names or symbol, a zero timeframe, or a
    ///   super-context without a program id
    /// - [`Error::IllegalState`] for uninit causes the host never produces in this
    ///   situation, or if a restored record would displace another live main record
    /// - [`Error::RuntimeError`] if the display surface cannot be resolved or a chart
    ///   change finds no indicator in limbo
    pub fn main_init(&self, record: &ContextRc, args: &MainInit<'_>) -> Result<InitOutcome> {
        let result = self.main_init_inner(record, args);
        self.report(record, DiagnosticCategory::Synchronizer, result)
    }

    /// Synchronizes a main module record at the start of `start()`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the record is not attached.
    pub fn main_start(&self, record: &ContextRc, tick_time: i64) -> Result<()> {
        let result = self.main_start_inner(record, tick_time);
        self.report(record, DiagnosticCategory::Synchronizer, result)
    }

    /// Synchronizes a main module record at the start of `deinit()`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the record is not attached.
    pub fn main_deinit(&self, record: &ContextRc, uninit_reason: UninitReason) -> Result<()> {
        let result = self.main_deinit_inner(record, uninit_reason);
        self.report(record, DiagnosticCategory::Synchronizer, result)
    }

    /// Synchronizes a library record at the start of its `init()`.
    ///
    /// # Errors
    /// - [`Error::InvalidParameter`] for an empty name or symbol, or a zero timeframe
    /// - [`Error::IllegalState`] if a library is loaded by a thread that never executed a
    ///   program
    pub fn library_init(
        &self,
        record: &ContextRc,
        args: &LibraryInit<'_>,
    ) -> Result<LibraryInitKind> {
        let result = self.library_init_inner(record, args);
        self.report(record, DiagnosticCategory::Synchronizer, result)
    }

    /// Synchronizes a library record at the start of its `deinit()`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the record is not attached.
    pub fn library_deinit(&self, record: &ContextRc, uninit_reason: UninitReason) -> Result<()> {
        let result = self.library_deinit_inner(record, uninit_reason);
        self.report(record, DiagnosticCategory::Synchronizer, result)
    }

    /// Releases a record at the very end of its `deinit()`.
    ///
    /// Returns true if the chain's main slot was emptied.
    ///
    /// # Errors
    /// See [`release::leave_context`].
    pub fn leave_context(&self, record: &ContextRc) -> Result<bool> {
        let result = release::leave_context(&self.registry, record);
        self.report(record, DiagnosticCategory::Release, result)
    }

    fn main_init_inner(&self, record: &ContextRc, args: &MainInit<'_>) -> Result<InitOutcome> {
        require_text(args.program_name, "programName")?;
        require_text(args.symbol, "symbol")?;
        require_timeframe(args.timeframe)?;

        let nested = args.super_context.is_some();
        let parent = match args.super_context.as_ref().and_then(ContextRef::upgrade) {
            Some(parent) => {
                let parent = read_lock!(parent).clone();
                if !parent.is_attached() {
                    return Err(invalid_parameter!(
                        "invalid parameter superContext (programId = 0)"
                    ));
                }
                Some(parent)
            }
            None => None,
        };

        let initial_id = with_read!(record, |ctx: &ExecutionContext| ctx.program_id);
        if !initial_id.is_unassigned() {
            self.track(initial_id)?;
        }

        let resolution = InitReasonResolver::new(&*self.registry).resolve(&InitRequest {
            program_kind: args.program_kind,
            program_id: initial_id,
            program_name: args.program_name,
            uninit_reason: args.uninit_reason,
            symbol: args.symbol,
            nested,
            testing: args.flags.testing,
            visual_mode: args.flags.visual_mode,
            on_ui_thread: self.host.is_ui_thread(),
            ui_thread: self.host.ui_thread(),
            build: self.host.build(),
            surface: args.surface,
            drop: args.drop,
        })?;
        let reason = resolution.reason;

        let surface = self
            .host
            .resolve_surface(&SurfaceRequest {
                candidate: args.surface,
                super_surface: parent.as_ref().and_then(|p| p.surface),
                nested,
                module_kind: args.program_kind.into(),
                symbol: args.symbol,
                timeframe: args.timeframe,
                testing: args.flags.testing,
                visual_mode: args.flags.visual_mode,
            })
            .map_err(|err| match err {
                Error::RuntimeError { .. } => err,
                other => runtime_error!("display surface lookup failed: {}", other),
            })?;

        let mut super_context = args.super_context.clone();
        let mut new_chain = false;
        let mut previous_program = ProgramId::UNASSIGNED;

        let program_id = if initial_id.is_unassigned() {
            if let Some(original) = resolution.original_id {
                self.registry
                    .update(record, |ctx| ctx.program_id = original)?;
                self.track(original)?;
            }

            let id = match resolution.original_id {
                Some(original)
                    if args.program_kind == ProgramKind::Indicator && reason.is_init_cycle() =>
                {
                    self.restore_from_master(record, original)?;
                    original
                }
                _ => {
                    let id = self.registry.create_chain(record)?;
                    previous_program = self.registry.last_program(self.host.current_thread());
                    self.track(id)?;
                    new_chain = true;
                    id
                }
            };

            if args.program_kind == ProgramKind::Indicator
                && reason == InitReason::ProgramLoadAfterTest
            {
                // the expert that loaded the indicator is gone
                super_context = None;
                self.registry.update(record, |ctx| ctx.super_context = None)?;
            }
            id
        } else {
            let chain = self.registry.chain(initial_id)?;
            if chain.main()?.is_none() {
                chain.attach_main(record)?;
            }
            initial_id
        };

        let ticks = with_read!(record, |ctx: &ExecutionContext| ctx.ticks);
        if ticks == 0 {
            let window = surface.and_then(|s| self.host.surface_window(s));
            let inherit = if super_context.is_some() {
                parent.as_ref()
            } else {
                None
            };
            let effective = EffectiveFlags::resolve(
                args.program_kind,
                inherit,
                args.flags,
                surface,
                window,
                &self.host,
                &self.config,
            )?;

            self.registry.update(record, |ctx| {
                ctx.program_kind = Some(args.program_kind);
                ctx.program_name = args.program_name.to_string();
                ctx.module_kind = Some(ModuleKind::from(args.program_kind));
                ctx.module_name = args.program_name.to_string();
                ctx.super_context = super_context.clone();
                ctx.surface = surface;
                ctx.surface_window = window;
                ctx.testing = effective.testing;
                ctx.visual_mode = effective.visual_mode;
                ctx.optimization = effective.optimization;
                ctx.init_flags = args.init_flags;
                ctx.deinit_flags = args.deinit_flags;
                ctx.logging = effective.logging;
                ctx.custom_log_file = effective.custom_log_file.clone();
            })?;
        }

        let thread = self.host.current_thread();
        self.registry.update(record, |ctx| {
            ctx.root_function = Some(RootFunction::Init);
            ctx.init_reason = Some(reason);
            ctx.uninit_reason = args.uninit_reason;
            ctx.symbol = args.symbol.to_string();
            ctx.timeframe = args.timeframe;
            ctx.thread_id = thread;
        })?;

        let mut reattached = 0;
        if new_chain
            && args.program_kind == ProgramKind::Expert
            && self.config.reattach_libraries
            && !previous_program.is_unassigned()
            && with_read!(record, |ctx: &ExecutionContext| ctx.testing)
        {
            reattached = self.registry.exclusive(|| {
                self.reattach_libraries(record, program_id, previous_program)
            })?;
        }

        Ok(InitOutcome {
            program_id,
            init_reason: reason,
            new_chain,
            reattached,
        })
    }

    /// Copies the master of `id` into a fresh record and installs it as the main record.
    fn restore_from_master(&self, record: &ContextRc, id: ProgramId) -> Result<()> {
        let chain = self.registry.chain(id)?;
        let snapshot = read_lock!(chain.master()).clone();
        chain.attach_main(record)?;

        let mut ctx = write_lock!(record);
        *ctx = snapshot;
        Ok(())
    }

    /// Moves libraries the previous program left mid-init-cycle onto the chain of `id`.
    ///
    /// Runs under the registry lock.
    fn reattach_libraries(
        &self,
        record: &ContextRc,
        id: ProgramId,
        previous: ProgramId,
    ) -> Result<usize> {
        let previous_chain = self.registry.chain(previous)?;
        if !read_lock!(previous_chain.master()).init_cycle {
            return Ok(0);
        }

        let current_chain = self.registry.chain(id)?;
        let expert = read_lock!(record).clone();
        let fields = self.config.reattach_fields;
        let mut moved = 0;

        for (slot, library) in previous_chain.libraries()? {
            let Some(library) = library else {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        DiagnosticCategory::Synchronizer,
                        format!("library slot {slot} of program {previous} is empty, skipping"),
                    )
                    .with_code(crate::ErrorKind::IllegalState.to_string())
                    .with_program(previous)
                    .with_location(file!(), line!()),
                );
                continue;
            };

            let (owner, init_cycle) =
                with_read!(library, |ctx: &ExecutionContext| (ctx.program_id, ctx.init_cycle));
            if owner != previous {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        DiagnosticCategory::Synchronizer,
                        format!(
                            "library slot {slot} of program {previous} belongs to program {owner}, skipping"
                        ),
                    )
                    .with_code(crate::ErrorKind::IllegalState.to_string())
                    .with_program(previous)
                    .with_location(file!(), line!()),
                );
                continue;
            }
            if !init_cycle {
                continue;
            }

            previous_chain.detach(slot)?;
            self.registry.update(&library, |ctx| {
                ctx.program_id = id;
                ctx.init_cycle = false;
                copy_expert_fields(ctx, &expert, fields);
            })?;
            current_chain.append_library(&library)?;
            moved += 1;
        }

        self.registry
            .update_master(previous, |master| master.init_cycle = false)?;
        Ok(moved)
    }

    fn main_start_inner(&self, record: &ContextRc, tick_time: i64) -> Result<()> {
        let id = require_program(record)?;
        self.track(id)?;

        let thread = self.host.current_thread();
        let (ticks, previous_tick_time) =
            with_read!(record, |ctx: &ExecutionContext| (ctx.ticks, ctx.current_tick_time));
        let ticks = ticks.saturating_add(1);

        self.registry.update(record, |ctx| {
            ctx.root_function = Some(RootFunction::Start);
            ctx.thread_id = thread;
            ctx.ticks = ticks;
            ctx.previous_tick_time = previous_tick_time;
            ctx.current_tick_time = tick_time;
        })
    }

    fn main_deinit_inner(&self, record: &ContextRc, uninit_reason: UninitReason) -> Result<()> {
        let id = require_program(record)?;
        self.track(id)?;

        let thread = self.host.current_thread();
        self.registry.update(record, |ctx| {
            ctx.root_function = Some(RootFunction::Deinit);
            ctx.uninit_reason = uninit_reason;
            ctx.thread_id = thread;
        })
    }

    fn library_init_inner(
        &self,
        record: &ContextRc,
        args: &LibraryInit<'_>,
    ) -> Result<LibraryInitKind> {
        require_text(args.module_name, "moduleName")?;
        require_text(args.symbol, "symbol")?;
        require_timeframe(args.timeframe)?;

        let id = with_read!(record, |ctx: &ExecutionContext| ctx.program_id);
        let thread = self.host.current_thread();

        if id.is_unassigned() {
            self.track(ProgramId::UNASSIGNED)?;
            let loader = self.registry.last_program(thread);
            if loader.is_unassigned() {
                return Err(illegal_state!(
                    "library {} loaded on thread {} which never executed a program",
                    args.module_name,
                    thread
                ));
            }

            let snapshot = self.registry.master_snapshot(loader)?;
            {
                let mut ctx = write_lock!(record);
                *ctx = snapshot;
                ctx.module_kind = Some(ModuleKind::Library);
                ctx.module_name = args.module_name.to_string();
                ctx.root_function = Some(RootFunction::Init);
                ctx.init_cycle = false;
                ctx.init_reason = None;
                ctx.uninit_reason = args.uninit_reason;
                ctx.init_flags = args.init_flags;
                ctx.deinit_flags = args.deinit_flags;
                ctx.ticks = 0;
                ctx.last_error.clear();
            }

            let slot = self.registry.append_library(loader, record)?;
            return Ok(LibraryInitKind::FirstLoad {
                program_id: loader,
                slot,
            });
        }

        self.track(id)?;

        if self.host.is_ui_thread() {
            self.registry.update(record, |ctx| {
                ctx.root_function = Some(RootFunction::Init);
                ctx.init_cycle = false;
                ctx.uninit_reason = args.uninit_reason;
                ctx.symbol = args.symbol.to_string();
                ctx.timeframe = args.timeframe;
            })?;
            return Ok(LibraryInitKind::InitCycle);
        }

        // expert in the tester: the next expert init claims this library
        self.registry.update(record, |ctx| {
            ctx.root_function = Some(RootFunction::Init);
            ctx.init_cycle = true;
            ctx.uninit_reason = args.uninit_reason;
            ctx.visual_mode = false;
            ctx.optimization = args.optimization;
            ctx.logging = false;
            ctx.custom_log_file = None;
            ctx.symbol = args.symbol.to_string();
            ctx.timeframe = args.timeframe;
            ctx.surface = None;
            ctx.surface_window = None;
            ctx.thread_id = thread;
        })?;
        self.registry
            .update_master(id, |master| master.init_cycle = true)?;
        Ok(LibraryInitKind::PendingReattachment)
    }

    fn library_deinit_inner(&self, record: &ContextRc, uninit_reason: UninitReason) -> Result<()> {
        let id = require_program(record)?;
        self.track(id)?;

        self.registry.update(record, |ctx| {
            ctx.root_function = Some(RootFunction::Deinit);
            ctx.uninit_reason = uninit_reason;
        })
    }

    /// Records that the current thread executes `program`.
    fn track(&self, program: ProgramId) -> Result<TrackedThread> {
        let thread = self.host.current_thread();
        let tracked =
            self.registry
                .store_thread_program(thread, program, self.host.is_ui_thread())?;

        if tracked.inserted && tracked.index >= self.config.thread_warn_threshold {
            self.diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Debug,
                    DiagnosticCategory::Tracker,
                    format!("thread {thread} added (size={})", tracked.index + 1),
                )
                .with_program(program),
            );
        }
        Ok(tracked)
    }

    /// Records a failed operation and passes the result through.
    fn report<T>(
        &self,
        record: &ContextRc,
        category: DiagnosticCategory,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(error) = &result {
            let program = self.registry.last_program(self.host.current_thread());
            self.diagnostics.push(
                Diagnostic::from_error(category_of(error, category), error).with_program(program),
            );

            let kind = error.kind();
            let message = error.to_string();
            let stored = self.registry.update(record, |ctx| {
                ctx.last_error.platform = Some(kind);
                ctx.last_error.platform_msg = Some(message.clone());
            });
            if let Err(failure) = stored {
                self.diagnostics.push(
                    Diagnostic::from_error(category_of(&failure, category), &failure)
                        .with_program(program),
                );
            }
        }
        result
    }
}

/// Attributes an error to the component that raised it.
fn category_of(error: &Error, fallback: DiagnosticCategory) -> DiagnosticCategory {
    match error.location() {
        Some((file, _)) if file.contains("resolver") => DiagnosticCategory::Resolver,
        Some((file, _)) if file.contains("registry") => DiagnosticCategory::Registry,
        Some((file, _)) if file.contains("release") => DiagnosticCategory::Release,
        _ => fallback,
    }
}

fn copy_expert_fields(ctx: &mut ExecutionContext, expert: &ExecutionContext, fields: ReattachFields) {
    if fields.contains(ReattachFields::VISUAL_MODE) {
        ctx.visual_mode = expert.visual_mode;
    }
    if fields.contains(ReattachFields::OPTIMIZATION) {
        ctx.optimization = expert.optimization;
    }
    if fields.contains(ReattachFields::LOGGING) {
        ctx.logging = expert.logging;
    }
    if fields.contains(ReattachFields::CUSTOM_LOG_FILE) {
        ctx.custom_log_file = expert.custom_log_file.clone();
    }
    if fields.contains(ReattachFields::SURFACE) {
        ctx.surface = expert.surface;
        ctx.surface_window = expert.surface_window;
    }
}

fn require_text(value: &str, name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid_parameter!("invalid parameter {} = \"\" (empty)", name));
    }
    Ok(())
}

fn require_timeframe(timeframe: u32) -> Result<()> {
    if timeframe == 0 {
        return Err(invalid_parameter!("invalid parameter timeframe = 0"));
    }
    Ok(())
}

fn require_program(record: &ContextRc) -> Result<ProgramId> {
    let id = with_read!(record, |ctx: &ExecutionContext| ctx.program_id);
    if id.is_unassigned() {
        return Err(invalid_parameter!("invalid execution context (programId = 0)"));
    }
    Ok(id)
}
