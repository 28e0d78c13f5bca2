//! Harvest CLI entry point
//!
//! Parses arguments, runs the selected command and renders errors with
//! suggestions. Exits with status 1 on failure.

use anyhow::Result;
use clap::Parser;
use harvest_cli::cli;
use harvest_cli::core::user_friendly_error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
