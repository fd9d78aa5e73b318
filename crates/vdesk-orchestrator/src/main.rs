use anyhow::Result;
use clap::Parser;

use vdesk_cli::Cli;

mod bootstrap;
mod preflight;
mod run_driver;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bootstrap::init_tracing(cli.verbose);
    let options = run_driver::RunOptions::from_cli(&cli);
    let summary = run_driver::run(options).await?;
    if !summary.is_success() {
        // Partial failures are already in the run log; the exit code is for
        // schedulers and scripts.
        std::process::exit(1);
    }
    Ok(())
}
