//! Runs and their on-disk artifacts
//!
//! A run is one audit cycle of one RSE, named `{RSE}_{YYYY_MM_DD_HH_MM}`.
//! Every artifact of a run lives in the site's run directory:
//!
//! ```text
//! <runs>/
//! ├── SITE_2024_01_31_12_00_stats.json   # stage records
//! ├── SITE_2024_01_31_12_00_A.00000      # catalog dump before (partitioned)
//! ├── SITE_2024_01_31_12_00_R.00000      # storage scan (partitioned)
//! ├── SITE_2024_01_31_12_00_B.00000      # catalog dump after (partitioned)
//! ├── SITE_2024_01_31_12_00_D.list       # dark list
//! ├── SITE_2024_01_31_12_00_M.list       # missing list
//! └── SITE_2024_01_31_12_00_ED.list      # empty directories
//! ```
//!
//! Earlier runs are only ever read by later ones.

pub mod run;
pub mod stats;

pub use run::{utc_now, Artifact, RunDir, RunId};
pub use stats::{RunStats, StageStatus};

/// Stage names used as keys of the stats document
pub mod stages {
    pub const SCANNER: &str = "scanner";
    pub const DBDUMP_BEFORE: &str = "dbdump_before";
    pub const DBDUMP_AFTER: &str = "dbdump_after";
    pub const CMP3: &str = "cmp3";
    pub const DARK_ACTION: &str = "dark_action";
    pub const MISSING_ACTION: &str = "missing_action";
    pub const EMPTY_ACTION: &str = "empty_action";
}
