use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Encountered an error while parsing the configuration file. {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("The recorder is already enabled, finish or disable the current session first")]
    AlreadyEnabled,

    #[error("Worker routine name '{0}' must be in the form '<worker>.<routine>'")]
    MalformedWorkerRoutineName(String),

    #[error("String of {len} bytes exceeds the 255 byte dictionary limit: '{prefix}...'")]
    StringTooLong { len: usize, prefix: String },

    #[error("Work item stops at {stop_ns} ns, before its start at {start_ns} ns")]
    StopBeforeStart { start_ns: u64, stop_ns: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
