#[macro_use]
extern crate prettytable;

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use prettytable::Table;

mod classes;
mod job_info;
mod leaks;
mod tables;

use job_info::JobInfo;
use tables::MemoryColumn;

#[derive(Parser, Debug)]
struct TablesOpt {
    /// A job log containing `*MEMCOUNTER*` and/or `*MODULETIMER*` lines
    file: PathBuf,

    /// Write the parsed job as JSON instead of tables
    #[arg(long = "json")]
    json: bool,
}

#[derive(Parser, Debug)]
struct LeaksOpt {
    file: PathBuf,

    /// How many modules to list
    #[arg(long = "count", default_value_t = 25)]
    count: usize,

    /// Rank module types instead of individual modules
    #[arg(long = "by-type")]
    by_type: bool,

    #[arg(long = "json")]
    json: bool,
}

#[derive(Parser, Debug)]
struct ClassesOpt {
    file: PathBuf,

    #[arg(long = "json")]
    json: bool,
}

#[derive(Parser, Debug)]
#[command(name = "summarize", about = "Summarizes the per-module reports in a job log")]
enum Opt {
    /// Peak and retained memory, and real, user and system time per module and step
    #[clap(name = "tables")]
    Tables(TablesOpt),

    /// Modules whose retained memory grows from event to event
    #[clap(name = "leaks")]
    Leaks(LeaksOpt),

    /// Memory per module type
    #[clap(name = "classes")]
    Classes(ClassesOpt),
}

fn write_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error + Send + Sync>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn run_tables(opt: TablesOpt) -> Result<(), Box<dyn Error + Send + Sync>> {
    let job = JobInfo::from_path(&opt.file)?;

    if opt.json {
        return write_json(&job);
    }

    tables::print_tables(&job);
    if let Some(total) = job.module(job_info::EVENT_TOTAL) {
        let real: f64 = total.time_steps.values().map(|log| log.real).sum();
        println!(
            "Event loop: {:.3} s real over {} events",
            real,
            total.time_steps.len()
        );
    }
    if !job.rss.is_empty() {
        let peak = job.rss.iter().map(|sample| sample.rss).fold(0.0, f64::max);
        println!("Peak RSS: {:.1} MiB over {} samples", peak, job.rss.len());
    }

    Ok(())
}

fn run_leaks(opt: LeaksOpt) -> Result<(), Box<dyn Error + Send + Sync>> {
    let job = JobInfo::from_path(&opt.file)?;
    let job = if opt.by_type {
        classes::aggregate_by_type(&job)
    } else {
        job
    };

    let mut ranked = leaks::rank_by_retained_slope(&job.modules, &job.steps);
    ranked.truncate(opt.count);

    if opt.json {
        return write_json(&ranked);
    }

    let mut table = Table::new();
    table.set_titles(row!["Type", "Name", "MiB per event", "Events"]);
    for candidate in &ranked {
        table.add_row(row![
            candidate.type_name,
            candidate.name,
            format!("{:.4}", candidate.slope),
            candidate.events,
        ]);
    }
    table.printstd();

    Ok(())
}

fn run_classes(opt: ClassesOpt) -> Result<(), Box<dyn Error + Send + Sync>> {
    let job = JobInfo::from_path(&opt.file)?;
    let by_type = classes::aggregate_by_type(&job);

    if opt.json {
        return write_json(&by_type.modules);
    }

    for column in &[MemoryColumn::Peak, MemoryColumn::Retained, MemoryColumn::Product] {
        println!("{}", column.title());
        tables::memory_table(&by_type, *column).printstd();
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opt = Opt::parse();

    match opt {
        Opt::Tables(opt) => run_tables(opt),
        Opt::Leaks(opt) => run_leaks(opt),
        Opt::Classes(opt) => run_classes(opt),
    }
}
