use clap::Parser;
use profane::decoder;
use profane::{prelude::*, tracing::try_init_tracing_subscriber};
use tracing::{info, warn};

/// Record a self-profiling trace: worker threads running nested spans plus a
/// recursive depth test
#[derive(Parser, Debug, Clone)]
#[clap(version)]
pub struct Opts {
    #[clap(flatten)]
    pub cfg_opts: ConfigOpts,

    #[clap(flatten)]
    pub rec_opts: RecorderOpts,

    /// Number of worker threads
    #[clap(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=8), help_heading = "WORKLOAD")]
    pub threads: u8,

    /// Spans per worker thread
    #[clap(long, default_value_t = 1000, help_heading = "WORKLOAD")]
    pub iterations: u32,

    /// Read the trace back and report what was decoded
    #[clap(long)]
    pub read_back: bool,
}

const WORKERS: [(&str, &str); 8] = [
    ("Worker-1.batch", "Worker-1.step"),
    ("Worker-2.batch", "Worker-2.step"),
    ("Worker-3.batch", "Worker-3.step"),
    ("Worker-4.batch", "Worker-4.step"),
    ("Worker-5.batch", "Worker-5.step"),
    ("Worker-6.batch", "Worker-6.step"),
    ("Worker-7.batch", "Worker-7.step"),
    ("Worker-8.batch", "Worker-8.step"),
];

const DEPTH_LEVELS: usize = 6;

#[rustfmt::skip]
const DEPTH_NAMES: [&str; DEPTH_LEVELS * DEPTH_LEVELS] = [
    "z-1.1", "z-1.2", "z-1.3", "z-1.4", "z-1.5", "z-1.6",
    "z-2.1", "z-2.2", "z-2.3", "z-2.4", "z-2.5", "z-2.6",
    "z-3.1", "z-3.2", "z-3.3", "z-3.4", "z-3.5", "z-3.6",
    "z-4.1", "z-4.2", "z-4.3", "z-4.4", "z-4.5", "z-4.6",
    "z-5.1", "z-5.2", "z-5.3", "z-5.4", "z-5.5", "z-5.6",
    "z-6.1", "z-6.2", "z-6.3", "z-6.4", "z-6.5", "z-6.6",
];

type Recorder = EventRecorder<ActorCapture>;

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
            std::process::exit(exitcode::SOFTWARE);
        }
    }
}

fn do_main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();

    try_init_tracing_subscriber()?;

    let intr = Interruptor::new();
    let interruptor = intr.clone();
    ctrlc::set_handler(move || {
        if intr.is_set() {
            // 128 (fatal error signal "n") + 2 (control-c is fatal error signal 2)
            std::process::exit(130);
        } else {
            intr.set();
        }
    })?;

    let cfg = ProfaneConfig::load_merge_with_opts(opts.cfg_opts, opts.rec_opts, Default::default())?;
    let rec_cfg = cfg.recorder;
    let program_name = rec_cfg
        .program_name
        .unwrap_or_else(|| env!("CARGO_BIN_NAME").to_owned());

    let mut rec = EventRecorder::new(ActorCapture::new())
        .with_section_threshold(rec_cfg.section_threshold)
        .describe(&program_name, &rec_cfg.description);
    rec.enable(Destination::Path(rec_cfg.output.clone()), rec_cfg.capacity)?;

    let depth_events = DEPTH_NAMES
        .into_iter()
        .map(|n| ActorEvent::new(n, 0))
        .collect::<Result<Vec<_>, _>>()?;
    let workers = WORKERS[..usize::from(opts.threads)]
        .iter()
        .enumerate()
        .map(|(i, &(batch, step))| {
            Ok((
                ActorEvent::new(batch, i as u32)?,
                ActorEvent::new(step, i as u32)?,
            ))
        })
        .collect::<Result<Vec<_>, profane::error::Error>>()?;

    {
        let _main = rec.trace(ActorEvent::new("Main.main", 0)?);

        {
            let _depth = rec.trace(ActorEvent::new("Main.depth-test", 0)?);
            depth_test(&rec, &depth_events, DEPTH_LEVELS - 1, DEPTH_LEVELS - 1, &interruptor);
        }

        let _threads = rec.trace(ActorEvent::new("Main.threads", 0)?);
        std::thread::scope(|s| {
            for (batch, step) in workers.iter() {
                let rec = &rec;
                let interruptor = &interruptor;
                s.spawn(move || worker(rec, *batch, *step, opts.iterations, interruptor));
            }
        });
    }

    if interruptor.is_set() {
        warn!("Interrupted, writing what was captured so far");
    }
    let captured = rec.captured();
    let written = rec.finish(&program_name, &rec_cfg.description)?;
    info!(captured, written, "Wrote trace");
    println!("Wrote {written} work items to {}", rec_cfg.output.display());

    if opts.read_back {
        let tf = decoder::read_file(&rec_cfg.output)?;
        println!(
            "Read back {} work items in {} sections, {} strings, {} issues",
            tf.work_items.len(),
            tf.sections,
            tf.dictionary.len() - 1,
            tf.issues.len()
        );
        for issue in tf.issues.iter() {
            println!("  {issue}");
        }
    }

    Ok(())
}

fn depth_test(rec: &Recorder, events: &[ActorEvent], level: usize, phase: usize, intr: &Interruptor) {
    if intr.is_set() {
        return;
    }
    let _span = rec.trace(events[DEPTH_LEVELS * level + phase]);
    if level > 0 {
        depth_test(rec, events, level - 1, phase, intr);
    }
    if phase > 0 {
        depth_test(rec, events, level, phase - 1, intr);
    }
}

fn worker(rec: &Recorder, batch: ActorEvent, step: ActorEvent, iterations: u32, intr: &Interruptor) {
    let _batch = rec.trace(batch);
    let mut acc = 0u64;
    for i in 0..iterations {
        if intr.is_set() {
            break;
        }
        let _step = rec.trace(step);
        acc = acc.wrapping_mul(31).wrapping_add(u64::from(i));
        std::hint::black_box(acc);
    }
}
