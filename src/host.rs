//! Collaborators provided by the hosting application.
//!
//! The synchronizer never talks to the operating system or the host directly. Everything
//! it needs to know about the environment comes through the [`Host`] trait: the host build
//! number, thread identities, and window lookups for display surfaces.

use crate::{
    context::{ModuleKind, ThreadId, WindowHandle},
    Result,
};

/// Input for resolving a program's display surface.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceRequest<'a> {
    /// Handle the host passed in, if it passed one.
    pub candidate: Option<WindowHandle>,
    /// Surface of the live super-context, if any.
    pub super_surface: Option<WindowHandle>,
    /// True if the program runs nested in another program.
    pub nested: bool,
    /// Kind of the module asking.
    pub module_kind: ModuleKind,
    /// Current symbol.
    pub symbol: &'a str,
    /// Current timeframe in minutes.
    pub timeframe: u32,
    /// Raw testing flag as reported by the host.
    pub testing: bool,
    /// Raw visual-mode flag as reported by the host.
    pub visual_mode: bool,
}

/// The hosting application.
///
/// Implementations must be callable from any thread the host drives.
pub trait Host: Send + Sync {
    /// Build number of the running host.
    fn build(&self) -> u32;

    /// OS thread executing the current call.
    fn current_thread(&self) -> ThreadId;

    /// The host's UI thread.
    fn ui_thread(&self) -> ThreadId;

    /// True if the current call runs on the UI thread.
    fn is_ui_thread(&self) -> bool {
        self.current_thread() == self.ui_thread()
    }

    /// Locates a surface by enumerating the host's windows.
    ///
    /// Called by [`Host::resolve_surface`] when nothing cheaper applies. `Ok(None)` means
    /// the program legitimately has no surface.
    ///
    /// # Errors
    /// Implementations return [`crate::Error::RuntimeError`] if the lookup itself failed.
    fn locate_surface(&self, request: &SurfaceRequest<'_>) -> Result<Option<WindowHandle>>;

    /// Resolves the effective surface of a program.
    ///
    /// A handle the host passed in wins. A nested program shares the surface of its
    /// super-context. A non-visual test run has no surface. Everything else is looked up
    /// via [`Host::locate_surface`].
    ///
    /// # Errors
    /// Propagates errors of [`Host::locate_surface`].
    fn resolve_surface(&self, request: &SurfaceRequest<'_>) -> Result<Option<WindowHandle>> {
        if request.candidate.is_some() {
            return Ok(request.candidate);
        }
        if request.nested {
            return Ok(request.super_surface);
        }
        if request.testing && !request.visual_mode {
            return Ok(None);
        }
        self.locate_surface(request)
    }

    /// Frame window holding `surface`.
    fn surface_window(&self, surface: WindowHandle) -> Option<WindowHandle>;

    /// Title of `window`, `None` if the window does not exist.
    fn window_title(&self, window: WindowHandle) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::MockHost;

    fn request(candidate: Option<WindowHandle>) -> SurfaceRequest<'static> {
        SurfaceRequest {
            candidate,
            super_surface: None,
            nested: false,
            module_kind: ModuleKind::Indicator,
            symbol: "EURUSD",
            timeframe: 60,
            testing: false,
            visual_mode: false,
        }
    }

    #[test]
    fn test_candidate_wins() {
        let host = MockHost::new().with_located_surface(Some(WindowHandle(0x20)));
        let surface = host.resolve_surface(&request(Some(WindowHandle(0x10))));
        assert_eq!(surface.unwrap(), Some(WindowHandle(0x10)));
    }

    #[test]
    fn test_super_context_surface() {
        let host = MockHost::new().with_located_surface(Some(WindowHandle(0x20)));
        let req = SurfaceRequest {
            nested: true,
            super_surface: Some(WindowHandle(0x30)),
            ..request(None)
        };
        assert_eq!(host.resolve_surface(&req).unwrap(), Some(WindowHandle(0x30)));

        let headless_parent = SurfaceRequest {
            super_surface: None,
            ..req
        };
        assert_eq!(host.resolve_surface(&headless_parent).unwrap(), None);
    }

    #[test]
    fn test_headless_test_run_has_no_surface() {
        let host = MockHost::new().with_located_surface(Some(WindowHandle(0x20)));
        let req = SurfaceRequest {
            testing: true,
            ..request(None)
        };
        assert_eq!(host.resolve_surface(&req).unwrap(), None);

        let visual = SurfaceRequest {
            visual_mode: true,
            ..req
        };
        assert_eq!(host.resolve_surface(&visual).unwrap(), Some(WindowHandle(0x20)));
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let host = MockHost::new().with_failing_surface_lookup();
        assert!(host.resolve_surface(&request(None)).is_err());
    }

    #[test]
    fn test_ui_thread_detection() {
        let host = MockHost::new();
        assert!(host.is_ui_thread());
        host.set_thread(ThreadId(99));
        assert!(!host.is_ui_thread());
    }
}
