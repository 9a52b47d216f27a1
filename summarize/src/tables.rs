use crate::job_info::{JobInfo, MemoryLog, ModuleInfo, TimeLog};
use prettytable::{Cell, Row, Table};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryColumn {
    Peak,
    Retained,
    Product,
}

impl MemoryColumn {
    pub fn title(self) -> &'static str {
        match self {
            MemoryColumn::Peak => "Peak memory (MiB)",
            MemoryColumn::Retained => "Retained memory (MiB)",
            MemoryColumn::Product => "Product size (MiB)",
        }
    }

    fn value(self, log: &MemoryLog) -> f64 {
        match self {
            MemoryColumn::Peak => log.peak_memory,
            MemoryColumn::Retained => log.held_memory,
            MemoryColumn::Product => log.product_size,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeColumn {
    Real,
    User,
    Sys,
}

impl TimeColumn {
    pub fn title(self) -> &'static str {
        match self {
            TimeColumn::Real => "Real time (s)",
            TimeColumn::User => "User time (s)",
            TimeColumn::Sys => "System time (s)",
        }
    }

    fn value(self, log: &TimeLog) -> f64 {
        match self {
            TimeColumn::Real => log.real,
            TimeColumn::User => log.user,
            TimeColumn::Sys => log.sys,
        }
    }
}

fn header(job: &JobInfo) -> Row {
    let mut cells = vec![Cell::new("Type"), Cell::new("Name")];
    cells.extend(job.steps.iter().map(|step| Cell::new(step)));
    Row::new(cells)
}

fn module_row(
    type_name: &str,
    name: &str,
    steps: &[String],
    value: impl Fn(&str) -> Option<f64>,
) -> Row {
    let mut cells = vec![Cell::new(type_name), Cell::new(name)];
    cells.extend(steps.iter().map(|step| match value(step) {
        Some(value) => Cell::new(&format!("{:.3}", value)),
        None => Cell::new(""),
    }));
    Row::new(cells)
}

/// One row per module, one column per step. The whole-event totals of the
/// timer are left out.
pub fn memory_table(job: &JobInfo, column: MemoryColumn) -> Table {
    let mut table = Table::new();
    table.set_titles(header(job));

    for module in job.modules.iter().filter(|m| !m.is_event_total()) {
        table.add_row(module_row(&module.type_name, &module.name, &job.steps, |step| {
            module.steps.get(step).map(|log| column.value(log))
        }));
    }

    table
}

/// One row per module, one column per step, with the whole-event totals as
/// an `Event Total` row.
pub fn time_table(job: &JobInfo, column: TimeColumn) -> Table {
    let mut table = Table::new();
    table.set_titles(header(job));

    for module in &job.modules {
        let (type_name, name) = display_names(module);
        table.add_row(module_row(type_name, name, &job.steps, |step| {
            module.time_steps.get(step).map(|log| column.value(log))
        }));
    }

    table
}

fn display_names(module: &ModuleInfo) -> (&str, &str) {
    if module.is_event_total() {
        ("Event", "Total")
    } else {
        (&module.type_name, &module.name)
    }
}

pub fn print_tables(job: &JobInfo) {
    if job.contains_memory {
        for column in &[MemoryColumn::Peak, MemoryColumn::Retained] {
            println!("{}", column.title());
            memory_table(job, *column).printstd();
        }
    }
    if job.contains_time {
        for column in &[TimeColumn::Real, TimeColumn::User, TimeColumn::Sys] {
            println!("{}", column.title());
            time_table(job, *column).printstd();
        }
    }
    if !job.contains_memory && !job.contains_time {
        println!("No memory or timing reports found.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
 *MEMCOUNTER* Construction,tracks,TrackProducer,1048576,2097152,3,4
 *MEMCOUNTER* event1,tracks,TrackProducer,524288,3145728,5,5,Construction,0
 *MODULETIMER* event1,tracks,TrackProducer,1500000000,1000000000,0
 *MODULETIMER* event1,EVENT,EVENT,2000000000,1000000000,0
";

    fn cell_text(table: &Table, row: usize, column: usize) -> String {
        table
            .get_row(row)
            .and_then(|row| row.get_cell(column))
            .map(|cell| cell.get_content())
            .unwrap()
    }

    #[test]
    fn peak_and_retained_memory() {
        let job = JobInfo::from_reader(LOG.as_bytes()).unwrap();

        let peak = memory_table(&job, MemoryColumn::Peak);
        assert_eq!(peak.len(), 1);
        assert_eq!(cell_text(&peak, 0, 0), "TrackProducer");
        assert_eq!(cell_text(&peak, 0, 1), "tracks");
        assert_eq!(cell_text(&peak, 0, 2), "2.000");
        assert_eq!(cell_text(&peak, 0, 3), "3.000");

        let retained = memory_table(&job, MemoryColumn::Retained);
        assert_eq!(cell_text(&retained, 0, 2), "1.000");
        assert_eq!(cell_text(&retained, 0, 3), "0.500");
    }

    #[test]
    fn time_table_includes_event_totals() {
        let job = JobInfo::from_reader(LOG.as_bytes()).unwrap();

        let real = time_table(&job, TimeColumn::Real);
        assert_eq!(real.len(), 2);
        // No timing for construction.
        assert_eq!(cell_text(&real, 0, 2), "");
        assert_eq!(cell_text(&real, 0, 3), "1.500");
        assert_eq!(cell_text(&real, 1, 0), "Event");
        assert_eq!(cell_text(&real, 1, 1), "Total");
        assert_eq!(cell_text(&real, 1, 3), "2.000");
    }
}
