use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::*;

/// Environment variable naming a config file to use instead of the default.
pub const CONFIG_ENV_VAR: &str = "ORU_SLURM_CONFIG";
pub const CONFIG_FILE: &str = "config.json";

pub fn config_directory() -> Result<PathBuf> {
    let mut p = dirs::config_dir().ok_or_else(|| anyhow!("unable to determine user config directory"))?;
    p.push("oru-slurm");
    std::fs::create_dir_all(&p)
        .with_context(|| format!("failed to create oru-slurm config directory: {:?}", &p))?;
    Ok(p)
}

/// User settings for the submission driver.  Every field may be omitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Submission executable.
    pub sbatch: String,
    /// Use `sbatch-fake` when the submission executable is not installed.
    pub fake_fallback: bool,
    /// Program used to run targets, eg `python`.
    pub interpreter: Option<String>,
    /// Where temporary job scripts are written.
    pub script_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sbatch: "sbatch".to_string(),
            fake_fallback: true,
            interpreter: None,
            script_dir: None,
        }
    }
}

impl Config {
    /// Load from `$ORU_SLURM_CONFIG` if set, otherwise from `config.json` in
    /// [`config_directory`], falling back to defaults if that does not exist.
    pub fn load() -> Result<Self> {
        if let Some(p) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load_from(p);
        }
        let p = config_directory()?.join(CONFIG_FILE);
        if p.exists() {
            Self::load_from(p)
        } else {
            tracing::debug!("no config file at {:?}, using defaults", p);
            Ok(Config::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = read_json(path).with_context(|| format!("invalid config file {:?}", path))?;
        tracing::debug!(?config, "loaded config from {:?}", path);
        Ok(config)
    }
}
