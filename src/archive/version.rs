use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)").expect("version pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AppVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl AppVersion {
    /// Permissive `v?MAJOR.MINOR.PATCH` parse; trailing pre-release or build
    /// suffixes are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(raw.trim())?;
        Some(AppVersion {
            major: caps.get(1)?.as_str().parse().ok()?,
            minor: caps.get(2)?.as_str().parse().ok()?,
            patch: caps.get(3)?.as_str().parse().ok()?,
        })
    }

    /// An export is admissible when it comes from the same major line and
    /// a minor release no newer than ours.
    pub fn can_restore_from(&self, exported: &AppVersion) -> bool {
        exported.major == self.major && exported.minor <= self.minor
    }
}

/// Compatibility check on raw strings; an unparsable side is incompatible.
pub fn is_compatible(exported: &str, current: &str) -> bool {
    match (AppVersion::parse(exported), AppVersion::parse(current)) {
        (Some(exported), Some(current)) => current.can_restore_from(&exported),
        _ => false,
    }
}
