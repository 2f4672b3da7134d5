//! Sideload CLI Binary
//!
//! Command-line interface for manifest-driven Splunk app deployment.

use clap::Parser;
use sideload::cli::{execute, Cli};
use sideload::logging::{init_logging, LoggingConfig};
use std::process;

fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format.clone(),
    };
    if let Err(e) = init_logging(&logging) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(2);
    }

    // Execute command
    match execute(&cli.command) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
