use clap::{Args, Subcommand};
use std::path::PathBuf;

use cmbus_frame::DEFAULT_BUFFER_CAPACITY;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a broker with the built-in plugins and relay socket clients to it.
    Serve(ServeArgs),
    /// Send one envelope to a serving broker.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Broker configuration file (JSON).
    #[arg(long, env = "CMBUS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Plugins to load (comma-separated). Default: all built-in plugins.
    #[arg(long, value_delimiter = ',')]
    pub plugins: Option<Vec<String>>,
    /// This node's rank.
    #[arg(long)]
    pub node: Option<u32>,
    /// Per-channel high-water mark (0 for unbounded).
    #[arg(long)]
    pub hwm: Option<usize>,
    /// Largest serialized envelope accepted from a client, in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY, value_parser = parse_buffer_capacity)]
    pub buffer_capacity: usize,
}

fn parse_buffer_capacity(input: &str) -> Result<usize, String> {
    match input.parse::<usize>() {
        Ok(0) => Err("buffer capacity must be greater than zero".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(format!("invalid buffer capacity: {err}")),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Message tag, e.g. `echo.hello`.
    #[arg(long, short = 't')]
    pub tag: String,
    /// JSON document frame.
    #[arg(long)]
    pub json: Option<String>,
    /// Data frame as a string (requires --json).
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the data frame from a file (requires --json).
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for the reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
