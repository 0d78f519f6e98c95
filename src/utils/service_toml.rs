//! Load `.imgfilter.toml` from a directory. Both binaries read it so they agree on IPC names.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ServiceConfig;
use crate::utils::config::{PackagePaths, WorkerThreadLimits};

#[derive(Debug, Default, Deserialize)]
pub struct ServiceToml {
    #[serde(default)]
    service: ServiceSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSection {
    namespace: Option<String>,
    ipc_dir: Option<String>,
    /// Seconds.
    timeout: Option<u64>,
    threads: Option<usize>,
    output: Option<String>,
    foreground: Option<bool>,
    verbose: Option<bool>,
}

/// Load the config file from `dir` if present. Returns None if missing or unreadable.
pub fn load_service_toml(dir: &Path) -> Option<ServiceToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_service_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

pub fn parse_service_toml(s: &str) -> Result<ServiceToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite config field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $cfg:expr, $sec_field:ident => $cfg_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $cfg.$cfg_field = v;
        }
    };
}

/// Apply file config (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_config(file: &ServiceToml, config: &mut ServiceConfig) {
    let sec = &file.service;
    if let Some(ref ns) = sec.namespace {
        config.namespace = ns.clone();
    }
    if let Some(ref dir) = sec.ipc_dir {
        config.ipc_dir = PathBuf::from(dir);
    }
    if let Some(secs) = sec.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(n) = sec.threads {
        config.threads = WorkerThreadLimits::clamp(n);
    }
    if let Some(ref out) = sec.output {
        config.output = PathBuf::from(out);
    }
    apply_file_opt!(sec, config, foreground => foreground);
    apply_file_opt!(sec, config, verbose => verbose);
}
