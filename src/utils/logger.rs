use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

static IN_WORKER: AtomicBool = AtomicBool::new(false);

/// Retag log lines of a forked child as "worker". Call first thing after `fork`.
pub fn mark_worker_process() {
    IN_WORKER.store(true, Ordering::Relaxed);
}

/// Install the process-wide logger. `role` tags every line ("client", "dispatcher"); the pid is
/// read per record so forked workers are told apart from their dispatcher.
pub fn setup_logging(role: &'static str, verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(move |buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let pid = std::process::id();
            let role = if IN_WORKER.load(Ordering::Relaxed) {
                "worker"
            } else {
                role
            };
            let tag = format!("{name} {role}[{pid}]");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", tag.cyan(), level_str, path, record.args())
                }
                _ => format!("[{}] {}", tag.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
