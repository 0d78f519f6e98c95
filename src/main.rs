//! imgfilter client: submit one filter job and save the processed image.

use anyhow::Result;
use clap::Parser;
use imgfilter::engine::arg_parser::ClientCli;
use imgfilter::engine::handle_client;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = ClientCli::parse();
    handle_client(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
