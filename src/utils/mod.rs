pub mod config;
pub mod logger;
pub mod output;
pub mod proc_limit;
pub mod service_toml;

pub use config::*;
pub use logger::{mark_worker_process, setup_logging};
pub use output::{temp_path_for, write_output_atomically};
pub use proc_limit::max_user_processes;
pub use service_toml::{ServiceToml, apply_file_to_config, load_service_toml};
