use clap::Parser;
use profane::decoder;
use profane::{prelude::*, tracing::try_init_tracing_subscriber};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Print the contents of a profane trace file
#[derive(Parser, Debug, Clone)]
#[clap(version)]
pub struct Opts {
    #[clap(flatten)]
    pub cfg_opts: ConfigOpts,

    #[clap(flatten)]
    pub inspect_opts: InspectOpts,

    /// Exit with an error status when the file has decode issues
    #[clap(long)]
    pub strict: bool,

    /// Print a per-worker summary instead of individual work items
    #[clap(long)]
    pub summary: bool,

    /// Trace file to read
    #[clap(name = "input")]
    pub input: PathBuf,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Profane(#[from] profane::error::Error),

    #[error("Trace file has {0} decode issue(s)")]
    TraceIssues(usize),
}

fn main() {
    match do_main() {
        Ok(()) => (),
        Err(e) => {
            eprintln!("{e}");
            let mut cause = e.source();
            while let Some(err) = cause {
                eprintln!("Caused by: {err}");
                cause = err.source();
            }
            let code = match e.downcast_ref::<Error>() {
                Some(Error::TraceIssues(_)) => exitcode::DATAERR,
                _ => exitcode::SOFTWARE,
            };
            std::process::exit(code);
        }
    }
}

fn do_main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();

    try_init_tracing_subscriber()?;

    let cfg = ProfaneConfig::load_merge_with_opts(
        opts.cfg_opts,
        Default::default(),
        opts.inspect_opts,
    )?;

    let tf = decoder::read_file(&opts.input).map_err(Error::from)?;

    println!("File:         {}", opts.input.display());
    println!("Version:      {}", tf.format_version);
    println!("Program:      {}", tf.program_name().unwrap_or("<unknown>"));
    println!("Description:  {}", tf.description().unwrap_or("<unknown>"));
    println!("Created (ns): {}", tf.created_at_ns);
    println!("Sections:     {}", tf.sections);
    println!("Work items:   {}", tf.work_items.len());
    println!("Strings:      {}", tf.dictionary.len() - 1);
    if let Some((start, stop)) = tf.time_span() {
        println!("Time span:    {} ns", stop - start);
    }

    if opts.summary {
        print_summary(&tf);
    } else {
        print_items(&tf, cfg.inspect.max_items);
    }

    if !tf.issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in tf.issues.iter() {
            println!("  {issue}");
        }
        if opts.strict {
            return Err(Error::TraceIssues(tf.issues.len()).into());
        }
    }

    Ok(())
}

fn print_items(tf: &TraceFile, max_items: usize) {
    if max_items == 0 || tf.work_items.is_empty() {
        return;
    }
    let origin = tf.time_span().map_or(0, |(start, _)| start);
    println!();
    println!(
        "{:>14} {:>12}  {:<24} {:<16} {:>8}  comment",
        "start", "duration", "worker.routine", "category", "task"
    );
    for (packed, item) in tf
        .work_items
        .iter()
        .zip(tf.work_items_resolved())
        .take(max_items)
    {
        match item {
            Some(item) => println!(
                "{:>14} {:>12}  {:<24} {:<16} {:>8}  {}",
                item.start_ns.saturating_sub(origin),
                item.duration_ns(),
                format!("{}.{}", item.worker, item.routine),
                item.category,
                item.task_id,
                item.comment,
            ),
            None => println!(
                "{:>14} {:>12}  <unresolved string index>",
                packed.start_ns.saturating_sub(origin),
                packed.duration_ns(),
            ),
        }
    }
    if tf.work_items.len() > max_items {
        println!("... {} more", tf.work_items.len() - max_items);
    }
}

#[derive(Default)]
struct WorkerStats {
    count: u64,
    total_ns: u64,
    max_ns: u64,
}

fn print_summary(tf: &TraceFile) {
    let mut workers: BTreeMap<&str, WorkerStats> = BTreeMap::new();
    for item in tf.work_items.iter() {
        let name = tf.string(item.worker_idx).unwrap_or("<unresolved>");
        let stats = workers.entry(name).or_default();
        stats.count += 1;
        stats.total_ns = stats.total_ns.saturating_add(item.duration_ns());
        stats.max_ns = stats.max_ns.max(item.duration_ns());
    }
    println!();
    println!("{:<24} {:>10} {:>16} {:>14}", "worker", "items", "total ns", "max ns");
    for (name, stats) in workers.iter() {
        println!(
            "{:<24} {:>10} {:>16} {:>14}",
            name, stats.count, stats.total_ns, stats.max_ns
        );
    }
}
