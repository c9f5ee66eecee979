//! djvm command-line tooling
//!
//! - [`args`]: command-line arguments
//! - [`commands`]: one function per subcommand, each producing JSON

#![allow(clippy::result_large_err)]

pub mod args;
pub mod commands;
