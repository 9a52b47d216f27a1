//! Service configuration, using the option names of the host framework's
//! job configuration.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryCounterConfig {
    /// Module labels to analyse. Empty means every module.
    pub modules_to_analyse: Vec<String>,
    pub verbose: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpConfig {
    /// The file the external profiler watches; touching it requests a dump.
    pub igprof_watch_file: PathBuf,
    /// Where the external profiler writes its dump.
    pub igprof_dump: PathBuf,
    /// Label of the module whose events trigger dumps.
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub event_start_numbers: Vec<u64>,
    #[serde(default)]
    pub event_end_numbers: Vec<u64>,
    #[serde(default = "DumpConfig::default_sleep_after_touch_ms")]
    pub sleep_after_touch_ms: u64,
}

impl DumpConfig {
    fn default_sleep_after_touch_ms() -> u64 {
        500
    }

    pub fn sleep_after_touch(&self) -> Duration {
        Duration::from_millis(self.sleep_after_touch_ms)
    }
}

/// Which services a job runs and how they are configured. A missing section
/// means the service is not wanted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicesConfig {
    pub memory_counter: Option<MemoryCounterConfig>,
    pub igprof_dump: Option<DumpConfig>,
    pub check_rss: bool,
    pub module_timer: bool,
    /// Write report lines here instead of standard output.
    pub report_file: Option<PathBuf>,
}

impl ServicesConfig {
    pub fn from_json_str(json: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("unable to read {}: {}", path.display(), e))?;
        Self::from_json_str(&contents)
    }
}
