//! Process statistics read from `/proc`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Why a statistics sample could not be taken. A failed sample is never
/// replaced with zeros.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("unable to open {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to split the columns in {} properly", .path.display())]
    Malformed { path: PathBuf },
    #[error("unable to parse column {column} of {}: {value:?}", .path.display())]
    BadValue {
        path: PathBuf,
        column: usize,
        value: String,
    },
    #[error("unable to read the CPU time of the process: {source}")]
    CpuTime {
        #[source]
        source: io::Error,
    },
}

/// Resident and virtual memory of a process, in KiB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUse {
    pub rss_kib: u64,
    pub size_kib: u64,
}

static PAGE_SIZE_KIB: OnceLock<u64> = OnceLock::new();

/// The system page size in KiB, looked up once per process.
pub fn page_size_kib() -> u64 {
    *PAGE_SIZE_KIB.get_or_init(|| system_page_size() / 1024)
}

#[cfg(unix)]
fn system_page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        really_warn!("page_size_kib: sysconf(_SC_PAGESIZE) failed, assuming 4096 bytes");
        4096
    } else {
        size as u64
    }
}

#[cfg(not(unix))]
fn system_page_size() -> u64 {
    4096
}

/// Reads memory use and system load for one process.
#[derive(Clone, Debug)]
pub struct ProcessStatistics {
    statm_path: PathBuf,
    loadavg_path: PathBuf,
    page_size_kib: u64,
}

impl ProcessStatistics {
    /// Statistics of the calling process.
    pub fn current_process() -> Self {
        Self::for_pid(std::process::id())
    }

    pub fn for_pid(pid: u32) -> Self {
        ProcessStatistics {
            statm_path: PathBuf::from(format!("/proc/{}/statm", pid)),
            loadavg_path: PathBuf::from("/proc/loadavg"),
            page_size_kib: page_size_kib(),
        }
    }

    /// Reads from arbitrary files laid out like `statm` and `loadavg`.
    pub fn with_paths(
        statm_path: impl Into<PathBuf>,
        loadavg_path: impl Into<PathBuf>,
        page_size_kib: u64,
    ) -> Self {
        ProcessStatistics {
            statm_path: statm_path.into(),
            loadavg_path: loadavg_path.into(),
            page_size_kib,
        }
    }

    pub fn memory_use(&self) -> Result<MemoryUse, SampleError> {
        let contents = read(&self.statm_path)?;
        let columns: Vec<&str> = contents.split_whitespace().collect();
        if columns.len() < 2 {
            return Err(SampleError::Malformed {
                path: self.statm_path.clone(),
            });
        }

        // statm counts pages: size first, then resident. See proc(5).
        let size = parse_column::<u64>(&self.statm_path, &columns, 0)?;
        let rss = parse_column::<u64>(&self.statm_path, &columns, 1)?;

        Ok(MemoryUse {
            rss_kib: rss * self.page_size_kib,
            size_kib: size * self.page_size_kib,
        })
    }

    /// The one minute load average.
    pub fn system_load(&self) -> Result<f32, SampleError> {
        let contents = read(&self.loadavg_path)?;
        let columns: Vec<&str> = contents.split_whitespace().collect();
        if columns.is_empty() {
            return Err(SampleError::Malformed {
                path: self.loadavg_path.clone(),
            });
        }
        parse_column::<f32>(&self.loadavg_path, &columns, 0)
    }
}

fn read(path: &Path) -> Result<String, SampleError> {
    fs::read_to_string(path).map_err(|source| SampleError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_column<T: std::str::FromStr>(
    path: &Path,
    columns: &[&str],
    column: usize,
) -> Result<T, SampleError> {
    columns[column].parse().map_err(|_| SampleError::BadValue {
        path: path.to_path_buf(),
        column,
        value: columns[column].to_string(),
    })
}
