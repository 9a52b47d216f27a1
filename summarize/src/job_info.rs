use modprof::report::{MEMCOUNTER_MARKER, MODULETIMER_MARKER, RSSDUMP_MARKER};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const KIB_PER_MIB: f64 = 1024.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Label and type the module timer uses for whole-event totals.
pub const EVENT_TOTAL: &str = "EVENT";

/// One `*MEMCOUNTER*` sample, sizes in MiB.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryLog {
    pub held_memory: f64,
    pub peak_memory: f64,
    pub held_allocations: i64,
    pub peak_allocations: i64,
    /// Memory the module held at the end of this step that was gone by the
    /// start of its next step, i.e. what the framework freed on its behalf.
    pub product_size: f64,
}

impl MemoryLog {
    /// Held memory that is not accounted for by products.
    pub fn retained(&self) -> f64 {
        self.held_memory - self.product_size
    }
}

/// One `*MODULETIMER*` sample, in seconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeLog {
    pub real: f64,
    pub user: f64,
    pub sys: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub type_name: String,
    pub steps: FxHashMap<String, MemoryLog>,
    pub time_steps: FxHashMap<String, TimeLog>,
}

impl ModuleInfo {
    pub(crate) fn new(name: &str, type_name: &str) -> ModuleInfo {
        ModuleInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            steps: FxHashMap::default(),
            time_steps: FxHashMap::default(),
        }
    }

    pub fn is_event_total(&self) -> bool {
        self.name == EVENT_TOTAL && self.type_name == EVENT_TOTAL
    }
}

/// One `*RSSDUMP*` sample, sizes in MiB.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RssSample {
    pub boundary: String,
    pub module: String,
    pub rss: f64,
    pub size: f64,
    pub load: f32,
}

/// Everything the services reported for one job.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// In the order they were first seen.
    pub modules: Vec<ModuleInfo>,
    #[serde(skip)]
    module_index: FxHashMap<String, usize>,
    /// Modules in the order they first ran an event.
    pub run_order: Vec<String>,
    /// Step labels in the order they were first seen.
    pub steps: Vec<String>,
    pub contains_time: bool,
    pub contains_memory: bool,
    pub rss: Vec<RssSample>,
}

impl JobInfo {
    pub fn from_path(path: &Path) -> Result<JobInfo, Box<dyn Error + Send + Sync>> {
        let file = File::open(path)
            .map_err(|e| format!("unable to open {}: {}", path.display(), e))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<JobInfo, Box<dyn Error + Send + Sync>> {
        let mut job = JobInfo::default();
        for (index, line) in reader.lines().enumerate() {
            job.add_line(&line?)
                .map_err(|e| format!("line {}: {}", index + 1, e))?;
        }
        Ok(job)
    }

    /// A job made of already collected modules, e.g. modules merged by type.
    pub fn from_modules(modules: Vec<ModuleInfo>, steps: Vec<String>) -> JobInfo {
        let module_index = modules
            .iter()
            .enumerate()
            .map(|(index, module)| (module.name.clone(), index))
            .collect();
        let run_order = modules
            .iter()
            .filter(|module| module.steps.keys().any(|step| step.starts_with("event")))
            .map(|module| module.name.clone())
            .collect();

        JobInfo {
            contains_memory: modules.iter().any(|module| !module.steps.is_empty()),
            contains_time: modules.iter().any(|module| !module.time_steps.is_empty()),
            modules,
            module_index,
            run_order,
            steps,
            rss: Vec::new(),
        }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.module_index.get(name).map(|&index| &self.modules[index])
    }

    /// Lines without one of the report markers are ignored.
    pub fn add_line(&mut self, line: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let line = line.trim();
        if let Some(rest) = strip_marker(line, MEMCOUNTER_MARKER) {
            self.add_memory_step(&rest.split(',').collect::<Vec<_>>())
        } else if let Some(rest) = strip_marker(line, MODULETIMER_MARKER) {
            self.add_time_step(&rest.split(',').collect::<Vec<_>>())
        } else if let Some(rest) = strip_marker(line, RSSDUMP_MARKER) {
            self.add_rss(&rest.split_whitespace().collect::<Vec<_>>())
        } else {
            Ok(())
        }
    }

    fn add_memory_step(&mut self, columns: &[&str]) -> Result<(), Box<dyn Error + Send + Sync>> {
        if columns.len() < 7 {
            return Err(format!("expected at least 7 memory columns, found {}", columns.len()).into());
        }
        self.contains_memory = true;

        let log = MemoryLog {
            held_memory: parse::<i64>(columns[3])? as f64 / BYTES_PER_MIB,
            peak_memory: parse::<i64>(columns[4])? as f64 / BYTES_PER_MIB,
            held_allocations: parse(columns[5])?,
            peak_allocations: parse(columns[6])?,
            product_size: 0.0,
        };
        // The trailing pair describes the step before this one.
        let product = if columns.len() >= 9 {
            Some((columns[7], parse::<i64>(columns[8])? as f64 / BYTES_PER_MIB))
        } else {
            None
        };

        let module = self.record_step(columns[0], columns[1], columns[2])?;
        module.steps.insert(columns[0].to_string(), log);
        if let Some((previous_step, size)) = product {
            if let Some(previous) = module.steps.get_mut(previous_step) {
                previous.product_size = size;
            }
        }
        Ok(())
    }

    fn add_time_step(&mut self, columns: &[&str]) -> Result<(), Box<dyn Error + Send + Sync>> {
        if columns.len() < 6 {
            return Err(format!("expected at least 6 time columns, found {}", columns.len()).into());
        }
        self.contains_time = true;

        let log = TimeLog {
            real: parse::<u64>(columns[3])? as f64 / NANOS_PER_SEC,
            user: parse::<u64>(columns[4])? as f64 / NANOS_PER_SEC,
            sys: parse::<u64>(columns[5])? as f64 / NANOS_PER_SEC,
        };
        let module = self.record_step(columns[0], columns[1], columns[2])?;
        module.time_steps.insert(columns[0].to_string(), log);
        Ok(())
    }

    fn add_rss(&mut self, columns: &[&str]) -> Result<(), Box<dyn Error + Send + Sync>> {
        match columns {
            [boundary, module, _type_name, "RSS/KiB", rss, "Size/KiB", size, "Load", load] => {
                self.rss.push(RssSample {
                    boundary: boundary.to_string(),
                    module: module.to_string(),
                    rss: parse::<u64>(rss)? as f64 / KIB_PER_MIB,
                    size: parse::<u64>(size)? as f64 / KIB_PER_MIB,
                    load: parse(load)?,
                });
                Ok(())
            }
            _ => Err(format!("malformed {} line", RSSDUMP_MARKER).into()),
        }
    }

    /// Notes the step and returns the module it belongs to, creating it on
    /// first sight.
    fn record_step(
        &mut self,
        step: &str,
        name: &str,
        type_name: &str,
    ) -> Result<&mut ModuleInfo, Box<dyn Error + Send + Sync>> {
        if !self.steps.iter().any(|s| s == step) {
            self.steps.push(step.to_string());
        }
        if step.starts_with("event") && !self.run_order.iter().any(|m| m == name) {
            self.run_order.push(name.to_string());
        }

        let index = match self.module_index.get(name) {
            Some(&index) => index,
            None => {
                self.modules.push(ModuleInfo::new(name, type_name));
                let index = self.modules.len() - 1;
                self.module_index.insert(name.to_string(), index);
                index
            }
        };

        let module = &mut self.modules[index];
        if module.type_name != type_name {
            return Err(format!(
                "module \"{}\" reported as both \"{}\" and \"{}\"",
                name, module.type_name, type_name
            )
            .into());
        }
        Ok(module)
    }
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker).map(str::trim_start)
}

fn parse<T>(value: &str) -> Result<T, Box<dyn Error + Send + Sync>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value \"{}\": {}", value, e).into())
}
