//! DefExtractor trait for per-family definition extraction.

use lxref_core::{Family, LxrefError, RawDef};

/// Trait for per-family definition extraction.
///
/// Each language family (C, Kconfig, device-tree, makefile) implements
/// this to turn blob bytes into `(ident, line, kind)` tuples. Extractors
/// are pure functions of the bytes: no filesystem, no database, no
/// ordering dependence, so re-running one always reproduces its output.
pub trait DefExtractor: Send + Sync {
    /// The family whose rules this extractor applies.
    fn family(&self) -> Family;

    /// Extract every definition site from one blob.
    ///
    /// Output need not be sorted or deduplicated; the caller does both
    /// before the tuples reach the database.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawDef>, LxrefError>;
}

/// Select the extractor for a family.
pub fn extractor_for(family: Family) -> Box<dyn DefExtractor> {
    match family {
        Family::C => Box::new(crate::languages::c::CExtractor::new()),
        Family::K => Box::new(crate::languages::kconfig::KconfigExtractor),
        Family::D => Box::new(crate::languages::devicetree::DeviceTreeExtractor),
        Family::M => Box::new(crate::languages::makefile::MakefileExtractor),
    }
}
