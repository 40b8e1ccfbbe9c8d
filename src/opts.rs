use crate::types::{Capacity, SectionThreshold};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOpts {
    /// Use configuration from file
    #[clap(long = "config", name = "config file", help_heading = "CONFIGURATION")]
    pub config_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RecorderOpts {
    /// Number of event slots to pre-allocate, events beyond this are dropped
    #[clap(long, name = "capacity", help_heading = "RECORDER CONFIGURATION")]
    pub capacity: Option<Capacity>,

    /// Number of work items per trace file section
    #[clap(long, name = "section-threshold", help_heading = "RECORDER CONFIGURATION")]
    pub section_threshold: Option<SectionThreshold>,

    /// Trace file to write
    #[clap(short = 'o', long, name = "output", help_heading = "RECORDER CONFIGURATION")]
    pub output: Option<PathBuf>,

    /// Program name stored in the trace manifest
    #[clap(long, name = "program-name", help_heading = "RECORDER CONFIGURATION")]
    pub program_name: Option<String>,

    /// Free-form description stored in the trace manifest
    #[clap(long, name = "description", help_heading = "RECORDER CONFIGURATION")]
    pub description: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct InspectOpts {
    /// Number of work items to print
    #[clap(short = 'n', long, name = "max-items", help_heading = "INSPECT CONFIGURATION")]
    pub max_items: Option<usize>,
}
