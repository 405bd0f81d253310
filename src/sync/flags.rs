//! Effective environment flags.
//!
//! The host's testing and visual-mode flags are wrong for indicators and scripts in several
//! situations, so they are derived from the display surface instead. A nested program never
//! derives anything: it inherits all flags from its super-context.

use crate::{
    config::SyncConfig,
    context::{ExecutionContext, ProgramKind, WindowHandle},
    host::Host,
    Result,
};

/// Raw flags as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostFlags {
    /// Raw testing flag.
    pub testing: bool,
    /// Raw visual-mode flag.
    pub visual_mode: bool,
    /// Raw optimization flag.
    pub optimization: bool,
}

/// Flags a program instance keeps for its whole life.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveFlags {
    /// Runs in the tester or on a tester chart.
    pub testing: bool,
    /// Runs in a visual test.
    pub visual_mode: bool,
    /// Runs in an optimization.
    pub optimization: bool,
    /// Logging is active.
    pub logging: bool,
    /// Custom log file, if any.
    pub custom_log_file: Option<String>,
}

impl EffectiveFlags {
    /// Flags inherited from a super-context.
    #[must_use]
    pub fn inherited(parent: &ExecutionContext) -> Self {
        EffectiveFlags {
            testing: parent.testing,
            visual_mode: parent.visual_mode,
            optimization: parent.optimization,
            logging: parent.logging,
            custom_log_file: parent.custom_log_file.clone(),
        }
    }

    /// Derives the flags of a top-level program.
    ///
    /// `surface_window` is the frame window of the program's display surface.
    ///
    /// # Errors
    /// Returns [`crate::Error::IllegalState`] for a script without a surface window.
    pub fn derive<H: Host + ?Sized>(
        kind: ProgramKind,
        raw: HostFlags,
        surface: Option<WindowHandle>,
        surface_window: Option<WindowHandle>,
        host: &H,
        config: &SyncConfig,
    ) -> Result<Self> {
        let marker = config.visual_title_marker.as_str();
        let title_is_visual = |window: WindowHandle| {
            host.window_title(window)
                .is_some_and(|title| title.ends_with(marker))
        };

        let testing = match kind {
            ProgramKind::Indicator => {
                if raw.testing {
                    true
                } else {
                    match surface_window {
                        // no chart: non-visual test
                        None => true,
                        Some(window) => match host.window_title(window) {
                            Some(title) if !title.is_empty() => title.ends_with(marker),
                            _ => false,
                        },
                    }
                }
            }
            ProgramKind::Expert => raw.testing,
            ProgramKind::Script => match surface_window {
                Some(window) => title_is_visual(window),
                None => return Err(illegal_state!("script without a chart window")),
            },
        };

        let visual_mode = match kind {
            ProgramKind::Indicator => testing && surface.is_some(),
            ProgramKind::Expert => raw.visual_mode,
            ProgramKind::Script => testing,
        };

        Ok(EffectiveFlags {
            testing,
            visual_mode,
            optimization: raw.optimization,
            logging: config.default_logging,
            custom_log_file: None,
        })
    }

    /// Resolves the flags of a program, preferring `parent` when it is live.
    ///
    /// # Errors
    /// See [`EffectiveFlags::derive`].
    pub fn resolve<H: Host + ?Sized>(
        kind: ProgramKind,
        parent: Option<&ExecutionContext>,
        raw: HostFlags,
        surface: Option<WindowHandle>,
        surface_window: Option<WindowHandle>,
        host: &H,
        config: &SyncConfig,
    ) -> Result<Self> {
        match parent {
            Some(parent) => Ok(Self::inherited(parent)),
            None => Self::derive(kind, raw, surface, surface_window, host, config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::MockHost;

    const CHART: WindowHandle = WindowHandle(0x100);
    const FRAME: WindowHandle = WindowHandle(0x200);

    fn derive(
        kind: ProgramKind,
        raw: HostFlags,
        surface: Option<WindowHandle>,
        host: &MockHost,
    ) -> Result<EffectiveFlags> {
        let window = surface.and_then(|s| host.surface_window(s));
        EffectiveFlags::derive(kind, raw, surface, window, host, &SyncConfig::default())
    }

    #[test]
    fn test_indicator_testing_rules() {
        let host = MockHost::new().with_window(CHART, FRAME, "EURUSD,H1");

        // host flag wins
        let raw = HostFlags {
            testing: true,
            ..HostFlags::default()
        };
        let flags = derive(ProgramKind::Indicator, raw, Some(CHART), &host).unwrap();
        assert!(flags.testing);
        assert!(flags.visual_mode);

        // regular chart
        let flags = derive(ProgramKind::Indicator, HostFlags::default(), Some(CHART), &host).unwrap();
        assert!(!flags.testing);
        assert!(!flags.visual_mode);

        // no chart at all: non-visual test
        let flags = derive(ProgramKind::Indicator, HostFlags::default(), None, &host).unwrap();
        assert!(flags.testing);
        assert!(!flags.visual_mode);

        // visual tester chart
        host.set_title(FRAME, "EURUSD,H1 (visual)");
        let flags = derive(ProgramKind::Indicator, HostFlags::default(), Some(CHART), &host).unwrap();
        assert!(flags.testing);
        assert!(flags.visual_mode);

        // chart loading from a template without a title yet
        host.set_title(FRAME, "");
        let flags = derive(ProgramKind::Indicator, HostFlags::default(), Some(CHART), &host).unwrap();
        assert!(!flags.testing);
    }

    #[test]
    fn test_expert_trusts_host() {
        let host = MockHost::new().with_window(CHART, FRAME, "EURUSD,H1 (visual)");
        let raw = HostFlags {
            testing: false,
            visual_mode: false,
            optimization: true,
        };
        let flags = derive(ProgramKind::Expert, raw, Some(CHART), &host).unwrap();
        assert!(!flags.testing);
        assert!(!flags.visual_mode);
        assert!(flags.optimization);
        assert!(flags.logging);
        assert!(flags.custom_log_file.is_none());
    }

    #[test]
    fn test_script_rules() {
        let host = MockHost::new().with_window(CHART, FRAME, "EURUSD,H1 (visual)");
        let flags = derive(ProgramKind::Script, HostFlags::default(), Some(CHART), &host).unwrap();
        assert!(flags.testing);
        assert!(flags.visual_mode);

        assert!(matches!(
            derive(ProgramKind::Script, HostFlags::default(), None, &host),
            Err(crate::Error::IllegalState { .. })
        ));
    }

    #[test]
    fn test_nested_inherits_everything() {
        let host = MockHost::new();
        let parent = ExecutionContext {
            testing: true,
            visual_mode: false,
            optimization: true,
            logging: false,
            custom_log_file: Some("tester.log".into()),
            ..ExecutionContext::default()
        };
        let raw = HostFlags {
            testing: false,
            visual_mode: true,
            optimization: false,
        };

        let flags = EffectiveFlags::resolve(
            ProgramKind::Indicator,
            Some(&parent),
            raw,
            Some(CHART),
            None,
            &host,
            &SyncConfig::default(),
        )
        .unwrap();

        assert_eq!(flags, EffectiveFlags::inherited(&parent));
        assert_eq!(flags.custom_log_file.as_deref(), Some("tester.log"));
    }

    #[test]
    fn test_custom_marker_and_logging_default() {
        let host = MockHost::new().with_window(CHART, FRAME, "EURUSD [tester]");
        let config = SyncConfig::default()
            .with_visual_title_marker("[tester]")
            .with_default_logging(false);
        let flags = EffectiveFlags::derive(
            ProgramKind::Indicator,
            HostFlags::default(),
            Some(CHART),
            Some(FRAME),
            &host,
            &config,
        )
        .unwrap();
        assert!(flags.testing);
        assert!(!flags.logging);
    }
}
