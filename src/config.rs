use crate::error::Result;
use crate::opts::{ConfigOpts, InspectOpts, RecorderOpts};
use crate::types::{Capacity, SectionThreshold};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file, used when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "PROFANE_CONFIG";

#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProfaneConfig {
    pub recorder: RecorderConfig,
    pub inspect: InspectConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecorderConfig {
    pub capacity: Capacity,
    pub section_threshold: SectionThreshold,
    pub output: PathBuf,

    /// Defaults to the name of the recording binary
    pub program_name: Option<String>,

    pub description: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capacity: Capacity::default(),
            section_threshold: SectionThreshold::default(),
            output: PathBuf::from("trace.profane"),
            program_name: None,
            description: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct InspectConfig {
    /// Number of work items to print
    pub max_items: usize,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self { max_items: 20 }
    }
}

impl ProfaneConfig {
    pub fn try_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `<config dir>/profane/config.toml`, if it exists.
    pub fn default_file() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("profane").join("config.toml"))
            .filter(|p| p.is_file())
    }

    pub fn load_merge_with_opts(
        cfg_opts: ConfigOpts,
        rec_opts: RecorderOpts,
        inspect_opts: InspectOpts,
    ) -> Result<Self> {
        let cfg = if let Some(cfg_path) = &cfg_opts.config_file {
            Self::try_from_file(cfg_path)?
        } else if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
            Self::try_from_file(Path::new(&env_path))?
        } else if let Some(path) = Self::default_file() {
            Self::try_from_file(&path)?
        } else {
            Self::default()
        };

        let recorder = RecorderConfig {
            capacity: rec_opts.capacity.unwrap_or(cfg.recorder.capacity),
            section_threshold: rec_opts
                .section_threshold
                .unwrap_or(cfg.recorder.section_threshold),
            output: rec_opts.output.unwrap_or(cfg.recorder.output),
            program_name: rec_opts.program_name.or(cfg.recorder.program_name),
            description: rec_opts.description.unwrap_or(cfg.recorder.description),
        };
        let inspect = InspectConfig {
            max_items: inspect_opts.max_items.unwrap_or(cfg.inspect.max_items),
        };

        Ok(Self { recorder, inspect })
    }
}
