use std::path::PathBuf;

use crate::duplicates::DuplicateSearchOptions;
use crate::haar::SketchType;
use crate::reference::ReferencePolicy;
use crate::search::{SearchRestriction, Threshold};

pub fn config_dir() -> Option<PathBuf> {
    dirs_next::home_dir().map(|d| d.join(".lookalike"))
}

/// `~/.lookalike/catalog.db`, or `./catalog.db` without a home directory.
pub fn default_db_path() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog.db")
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    /// Size of the scan thread pool; `None` uses every core. The number of
    /// partitions still follows the target count.
    pub threads: Option<usize>,
    pub threshold: Threshold,
    pub restriction: SearchRestriction,
    pub policy: ReferencePolicy,
    pub sketch: SketchType,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: default_db_path(),
            threads: None,
            threshold: Threshold::default(),
            restriction: SearchRestriction::default(),
            policy: ReferencePolicy::default(),
            sketch: SketchType::default(),
        }
    }
}

impl Config {
    pub fn duplicate_options(&self) -> DuplicateSearchOptions {
        DuplicateSearchOptions {
            threshold: self.threshold,
            restriction: self.restriction,
            policy: self.policy,
            sketch: self.sketch,
            threads: self.threads,
            ..Default::default()
        }
    }
}
