//! ---
//! havoc_section: "01-core-functionality"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Run identifiers used to correlate logs of one chaos run."
//! havoc_version: "v0.1.0"
//! havoc_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;

const RUN_ID_LIMIT: u64 = 999_999_999;

/// Random identifier attached to every log line and to the run's log directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

impl RunId {
    pub fn generate() -> Self {
        Self(rand::thread_rng().gen_range(0..RUN_ID_LIMIT))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Per-run log directory beneath `base`.
    pub fn log_dir(&self, base: &Path) -> PathBuf {
        base.join(format!("havoc-chaos-{}", self.0))
    }
}

impl From<u64> for RunId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
