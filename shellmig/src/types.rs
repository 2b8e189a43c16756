use serde::{Deserialize, Serialize};

/// Sentinel version meaning no migration has ever been recorded.
pub const NIL_VERSION: i64 = -1;

/// The single durable fact a driver maintains for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: i64,
    /// The last recorded transition started but was never confirmed.
    pub dirty: bool,
}

impl VersionRecord {
    /// State of a target with no record at all.
    pub const NIL: VersionRecord = VersionRecord {
        version: NIL_VERSION,
        dirty: false,
    };

    pub fn new(version: i64, dirty: bool) -> Self {
        Self { version, dirty }
    }

    pub fn is_nil(&self) -> bool {
        self.version == NIL_VERSION
    }

    /// Whether a replace should leave a stored pair behind.
    ///
    /// A dirty nil version is still written so that a failed first migration
    /// stays distinguishable from a fresh target.
    pub(crate) fn should_persist(&self) -> bool {
        self.version >= 0 || (self.version == NIL_VERSION && self.dirty)
    }
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self::NIL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_record_is_not_persisted() {
        assert!(!VersionRecord::NIL.should_persist());
        assert!(VersionRecord::NIL.is_nil());
    }

    #[test]
    fn dirty_nil_record_is_persisted() {
        assert!(VersionRecord::new(NIL_VERSION, true).should_persist());
    }

    #[test]
    fn real_versions_are_persisted() {
        assert!(VersionRecord::new(0, false).should_persist());
        assert!(VersionRecord::new(42, true).should_persist());
    }
}
