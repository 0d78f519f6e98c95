//! Command handlers: merge config layers, set up logging, run the role.

use anyhow::{Context, Result};
use log::debug;
use std::path::Path;
use std::time::Duration;

use crate::engine::arg_parser::{ClientCli, DispatcherCli};
use crate::engine::client::{JobOutcome, submit_and_wait};
use crate::engine::dispatcher::{Dispatcher, daemonize, install_reaper};
use crate::types::ServiceConfig;
use crate::utils::config::WorkerThreadLimits;
use crate::utils::{apply_file_to_config, load_service_toml, setup_logging};

/// Defaults, then the config file in `dir`.
pub fn base_config(dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    if let Some(file) = load_service_toml(dir) {
        apply_file_to_config(&file, &mut config);
    }
    config
}

fn client_config(cli: &ClientCli) -> ServiceConfig {
    let mut config = base_config(Path::new("."));
    if let Some(ref out) = cli.output {
        config.output = out.clone();
    }
    if let Some(secs) = cli.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(ref dir) = cli.ipc_dir {
        config.ipc_dir = dir.clone();
    }
    if let Some(ref ns) = cli.namespace {
        config.namespace = ns.clone();
    }
    if let Some(v) = cli.verbose {
        config.verbose = v;
    }
    config
}

fn dispatcher_config(cli: &DispatcherCli) -> ServiceConfig {
    let mut config = base_config(Path::new("."));
    if let Some(f) = cli.foreground {
        config.foreground = f;
    }
    if let Some(n) = cli.threads {
        config.threads = WorkerThreadLimits::clamp(n as usize);
    }
    if let Some(ref dir) = cli.ipc_dir {
        config.ipc_dir = dir.clone();
    }
    if let Some(ref ns) = cli.namespace {
        config.namespace = ns.clone();
    }
    if let Some(v) = cli.verbose {
        config.verbose = v;
    }
    config
}

/// Run one client job. Any failure (dispatcher unreachable, timeout, I/O) is returned as an error.
pub fn handle_client(cli: &ClientCli) -> Result<JobOutcome> {
    let config = client_config(cli);
    setup_logging("client", config.verbose);
    debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), config);
    let origin = std::process::id() as i32;
    let outcome = submit_and_wait(&config, origin, &cli.image, cli.filter, &cli.params)
        .with_context(|| format!("{} on {}", cli.filter, cli.image.display()))?;
    Ok(outcome)
}

/// Run the dispatcher until a shutdown signal or a fatal wait error. IPC state is torn down when
/// the dispatcher goes out of scope, whichever way this returns.
pub fn handle_dispatcher(cli: &DispatcherCli) -> Result<()> {
    let config = dispatcher_config(cli);
    setup_logging("dispatcher", config.verbose);
    debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), config);

    let mut dispatcher = Dispatcher::start(&config)?;
    if !config.foreground {
        daemonize()?;
    }
    install_reaper().context("install SIGCHLD reaper")?;
    dispatcher.install_shutdown_handler()?;
    dispatcher.run()
}
