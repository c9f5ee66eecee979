use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "djvm",
    author,
    version,
    about = "Deterministic sandbox for JVM-style class files",
    long_about = "Rewrites classes into a sandbox namespace and runs them deterministically.\n\n\
                  Class files are read and written as JSON. Set RUST_LOG for diagnostics."
)]
pub struct Args {
    /// Configuration file (JSON), applied on top of the built-in defaults
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rewrite classes into the sandbox namespace
    Rewrite(RewriteArgs),

    /// Show where class names land in the sandbox
    Names(NamesArgs),

    /// Print the effective configuration
    Config,

    /// Run a task class on one input value
    Run(RunArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Rewrite(_) => "rewrite",
            Command::Names(_) => "names",
            Command::Config => "config",
            Command::Run(_) => "run",
        }
    }
}

#[derive(Debug, ClapArgs)]
pub struct RewriteArgs {
    /// JSON file holding one class or an array of classes
    #[arg(value_name = "CLASSES")]
    pub classes: PathBuf,

    /// Write the rewritten classes here instead of stdout
    #[arg(long, short, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Print only names and SHA-256 digests of the rewritten classes
    #[arg(long, default_value_t = false)]
    pub digest_only: bool,
}

#[derive(Debug, ClapArgs)]
pub struct NamesArgs {
    /// Class names, binary (`a.b.C`) or internal (`a/b/C`)
    #[arg(required = true, value_name = "NAME")]
    pub names: Vec<String>,
}

#[derive(Debug, ClapArgs)]
pub struct RunArgs {
    /// JSON file holding the classes the task may load
    #[arg(value_name = "CLASSES")]
    pub classes: PathBuf,

    /// Binary name of the task class
    #[arg(value_name = "CLASS")]
    pub class_name: String,

    /// Input value as JSON, e.g. `{"string": "Hello"}`
    #[arg(long, default_value = "\"null\"")]
    pub input: String,
}
