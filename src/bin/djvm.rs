//! djvm: rewrite and run classes in a deterministic sandbox
//!
//! ## Example Usage
//!
//! ```bash
//! # Rewrite classes into the sandbox namespace
//! djvm rewrite classes.json --out sandboxed.json
//!
//! # Where does a class land, and how is it caught?
//! djvm names com.example.MyException java.lang.Exception
//!
//! # Run a task
//! djvm run classes.json com.example.ThrowAndCatch --input '{"string": "Hello World"}'
//! ```

use anyhow::Result;
use clap::Parser;
use djvm_sandbox::args::{Args, Command};
use djvm_sandbox::commands;

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let Args { config, command } = Args::parse();
    let configuration = commands::load_configuration(config.as_deref())?;
    tracing::debug!(command = command.name(), "starting");

    let output = match &command {
        Command::Rewrite(args) => commands::rewrite(&configuration, args)?,
        Command::Names(args) => commands::names(&configuration, args),
        Command::Config => commands::config(&configuration)?,
        Command::Run(args) => commands::run(&configuration, args)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
