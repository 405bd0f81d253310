//! Test doubles and record factories.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Mutex,
};

use dashmap::DashMap;

use crate::{
    context::{ExecutionContext, ModuleKind, ProgramKind, ThreadId, WindowHandle},
    host::{Host, SurfaceRequest},
    Result,
};

/// UI thread of every [`MockHost`].
pub const UI_THREAD: ThreadId = ThreadId(1);

/// Build reported by [`MockHost::new`].
pub const DEFAULT_BUILD: u32 = 1090;

/// Scriptable [`Host`].
///
/// The current thread is tracked per OS thread, so tests spawning threads can give each of
/// them its own host thread id. Threads that never called [`MockHost::set_thread`] run as
/// the UI thread.
#[derive(Debug)]
pub struct MockHost {
    build: AtomicU32,
    threads: DashMap<std::thread::ThreadId, ThreadId>,
    frames: DashMap<WindowHandle, WindowHandle>,
    titles: DashMap<WindowHandle, String>,
    located: Mutex<Option<WindowHandle>>,
    failing_lookup: AtomicBool,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost {
            build: AtomicU32::new(DEFAULT_BUILD),
            threads: DashMap::new(),
            frames: DashMap::new(),
            titles: DashMap::new(),
            located: Mutex::new(None),
            failing_lookup: AtomicBool::new(false),
        }
    }

    pub fn with_build(self, build: u32) -> Self {
        self.build.store(build, Ordering::Relaxed);
        self
    }

    /// Surface returned by window enumeration.
    pub fn with_located_surface(self, surface: Option<WindowHandle>) -> Self {
        *self.located.lock().unwrap() = surface;
        self
    }

    pub fn with_failing_surface_lookup(self) -> Self {
        self.failing_lookup.store(true, Ordering::Relaxed);
        self
    }

    /// Registers a chart surface inside a frame window with the given title.
    pub fn with_window(self, chart: WindowHandle, frame: WindowHandle, title: &str) -> Self {
        self.frames.insert(chart, frame);
        self.titles.insert(frame, title.to_string());
        self
    }

    /// Runs the calling OS thread as `thread` from now on.
    pub fn set_thread(&self, thread: ThreadId) {
        self.threads.insert(std::thread::current().id(), thread);
    }

    pub fn set_title(&self, frame: WindowHandle, title: &str) {
        self.titles.insert(frame, title.to_string());
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for MockHost {
    fn build(&self) -> u32 {
        self.build.load(Ordering::Relaxed)
    }

    fn current_thread(&self) -> ThreadId {
        self.threads
            .get(&std::thread::current().id())
            .map_or(UI_THREAD, |entry| *entry)
    }

    fn ui_thread(&self) -> ThreadId {
        UI_THREAD
    }

    fn locate_surface(&self, _request: &SurfaceRequest<'_>) -> Result<Option<WindowHandle>> {
        if self.failing_lookup.load(Ordering::Relaxed) {
            return Err(runtime_error!("window enumeration failed"));
        }
        Ok(*self.located.lock().unwrap())
    }

    fn surface_window(&self, surface: WindowHandle) -> Option<WindowHandle> {
        self.frames.get(&surface).map(|entry| *entry)
    }

    fn window_title(&self, window: WindowHandle) -> Option<String> {
        self.titles.get(&window).map(|entry| entry.clone())
    }
}

/// Turns `ctx` into the master of an indicator that left its chart and waits in limbo.
pub fn indicator_master(
    ctx: &mut ExecutionContext,
    name: &str,
    ui: ThreadId,
    surface: WindowHandle,
) {
    ctx.program_kind = Some(ProgramKind::Indicator);
    ctx.program_name = name.to_string();
    ctx.module_kind = Some(ModuleKind::Indicator);
    ctx.module_name = name.to_string();
    ctx.thread_id = ui;
    ctx.surface = Some(surface);
    ctx.root_function = None;
}
