//! imgfilterd: request dispatcher. Runs until SIGINT/SIGTERM, then removes its IPC state.

use anyhow::Result;
use clap::Parser;
use imgfilter::engine::arg_parser::DispatcherCli;
use imgfilter::engine::handle_dispatcher;

fn main() -> Result<()> {
    let cli = DispatcherCli::parse();
    handle_dispatcher(&cli)
}
