//! Host build quirks.
//!
//! The meaning of the host's uninit causes changed several times over its release
//! history. Every version-dependent decision of the resolver is listed here as a
//! [`HostQuirk`] with the inclusive build range it applies to.

use std::fmt;

use strum::{Display, EnumIter};

/// A version-dependent host behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum HostQuirk {
    /// A top-level indicator loaded with an undefined cause comes from a template.
    TemplateOnUndefined,
    /// A nested indicator in a non-visual test on the UI thread with an undefined cause
    /// is reloaded after the test.
    AfterTestOnUndefined,
    /// A nested indicator in a non-visual test with a remove cause is reloaded after
    /// the test.
    AfterTestOnRemove,
    /// A nested indicator in a visual test with a remove cause is reloaded after the test.
    AfterTestOnRemoveVisual,
    /// A nested indicator in a test with a chart-close cause is reloaded after the test.
    AfterTestOnChartClose,
    /// An expert loaded with a chart-close cause came from a template (later builds report
    /// a template cause instead).
    ChartCloseAsTemplate,
    /// The host reports a template cause for experts.
    TemplateCause,
}

/// An inclusive range of host builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildRange {
    /// First build of the range.
    pub first: u32,
    /// Last build of the range.
    pub last: u32,
}

impl BuildRange {
    /// Builds `first..=last`.
    #[must_use]
    pub const fn between(first: u32, last: u32) -> Self {
        BuildRange { first, last }
    }

    /// Builds up to and including `last`.
    #[must_use]
    pub const fn up_to(last: u32) -> Self {
        BuildRange { first: 0, last }
    }

    /// Builds from `first` on.
    #[must_use]
    pub const fn starting_at(first: u32) -> Self {
        BuildRange {
            first,
            last: u32::MAX,
        }
    }

    /// Returns true if `build` lies in the range.
    #[must_use]
    pub fn contains(&self, build: u32) -> bool {
        self.first <= build && build <= self.last
    }
}

impl fmt::Display for BuildRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first, self.last) {
            (0, u32::MAX) => write!(f, ".."),
            (0, last) => write!(f, "..={last}"),
            (first, u32::MAX) => write!(f, "{first}.."),
            (first, last) => write!(f, "{first}..={last}"),
        }
    }
}

/// Build ranges of all quirks.
pub const BUILD_QUIRKS: &[(HostQuirk, BuildRange)] = &[
    (HostQuirk::TemplateOnUndefined, BuildRange::up_to(653)),
    (HostQuirk::AfterTestOnUndefined, BuildRange::up_to(229)),
    (HostQuirk::AfterTestOnRemove, BuildRange::between(388, 628)),
    (HostQuirk::AfterTestOnRemoveVisual, BuildRange::between(578, 628)),
    (HostQuirk::AfterTestOnChartClose, BuildRange::starting_at(633)),
    (HostQuirk::ChartCloseAsTemplate, BuildRange::up_to(509)),
    (HostQuirk::TemplateCause, BuildRange::starting_at(510)),
];

/// Returns the build range of `quirk`.
#[must_use]
pub fn range_of(quirk: HostQuirk) -> Option<BuildRange> {
    BUILD_QUIRKS
        .iter()
        .find(|(q, _)| *q == quirk)
        .map(|(_, range)| *range)
}

/// Returns true if `build` shows `quirk`.
#[must_use]
pub fn has_quirk(build: u32, quirk: HostQuirk) -> bool {
    range_of(quirk).is_some_and(|range| range.contains(build))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_quirk_has_a_range() {
        for quirk in HostQuirk::iter() {
            assert!(range_of(quirk).is_some(), "{quirk} has no build range");
        }
    }

    #[test]
    fn test_range_boundaries() {
        assert!(has_quirk(653, HostQuirk::TemplateOnUndefined));
        assert!(!has_quirk(654, HostQuirk::TemplateOnUndefined));

        assert!(has_quirk(229, HostQuirk::AfterTestOnUndefined));
        assert!(!has_quirk(230, HostQuirk::AfterTestOnUndefined));

        assert!(!has_quirk(387, HostQuirk::AfterTestOnRemove));
        assert!(has_quirk(388, HostQuirk::AfterTestOnRemove));
        assert!(has_quirk(628, HostQuirk::AfterTestOnRemove));
        assert!(!has_quirk(629, HostQuirk::AfterTestOnRemove));

        assert!(!has_quirk(577, HostQuirk::AfterTestOnRemoveVisual));
        assert!(has_quirk(578, HostQuirk::AfterTestOnRemoveVisual));

        assert!(!has_quirk(632, HostQuirk::AfterTestOnChartClose));
        assert!(has_quirk(633, HostQuirk::AfterTestOnChartClose));
        assert!(has_quirk(1420, HostQuirk::AfterTestOnChartClose));
    }

    #[test]
    fn test_expert_template_quirks_partition_builds() {
        for build in [0, 509, 510, 1090] {
            assert_ne!(
                has_quirk(build, HostQuirk::ChartCloseAsTemplate),
                has_quirk(build, HostQuirk::TemplateCause)
            );
        }
    }

    #[test]
    fn test_range_display() {
        assert_eq!(BuildRange::up_to(653).to_string(), "..=653");
        assert_eq!(BuildRange::starting_at(633).to_string(), "633..");
        assert_eq!(BuildRange::between(388, 628).to_string(), "388..=628");
    }
}
