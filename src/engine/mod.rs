//! Engine module: the three process roles and their command handlers

pub mod arg_parser;
pub mod client;
pub mod dispatcher;
pub mod handlers;
pub mod parallel;
pub mod worker;

// Re-export commonly used functions
pub use arg_parser::{ClientCli, DispatcherCli};
pub use client::{JobOutcome, submit_and_wait};
pub use dispatcher::{Dispatcher, daemonize, install_reaper, reaped_count};
pub use handlers::{base_config, handle_client, handle_dispatcher};
pub use parallel::{ThreadWorkspace, partition_rows, run_bands};
pub use worker::{WorkerReport, WorkerSettings, run_worker};
