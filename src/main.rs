mod cli;

use anyhow::Result;
use clap::Parser;
use ecs_suite::capture::console;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log to the console's standard error as it was at startup, so log lines
/// are never swallowed by an output capture session.
fn init_tracing() {
    let writer = match console::stderr() {
        Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
        Err(_) => BoxMakeWriter::new(std::io::stderr),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    if let Err(e) = console::init() {
        eprintln!("warning: could not duplicate console descriptors: {e}");
    }
    init_tracing();

    match cli::run(args).await {
        // Exit explicitly: background jobs abandoned by a stop must not hold the
        // process open while the runtime waits for its blocking pool.
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
