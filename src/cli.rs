//! CLI argument parsing for the medway-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "medway-worker", about = "Medway route optimization worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker (default if no subcommand given)
    Serve,
    /// Run the health probe once and print the report
    Health,
}
