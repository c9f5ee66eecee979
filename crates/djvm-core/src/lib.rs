//! DJVM Core
//!
//! Deterministic sandboxing engine for JVM-style class files.
//!
//! Untrusted classes are moved into a sandbox namespace, their bytecode is
//! rewritten so that exceptions and strings cross the sandbox boundary in a
//! controlled way, and the rewritten classes run in an isolated runtime.
//!
//! # Features
//!
//! - **Class rewriting**: relocate every class reference into the namespace,
//!   except pinned, template and whitelisted classes
//! - **Shadow exceptions**: sandbox throwables travel through host code as
//!   `<X>$1DJVM` shadows and are unwrapped at every catch
//! - **Fatal signals**: `ThreadDeath` and its subclasses are never caught by
//!   sandboxed code
//! - **Runtime bridge**: value and throwable conversion, enum directories,
//!   a denylisted `classForName`
//!
//! # Core Modules
//!
//! - [`config`]: analysis and sandbox configuration
//! - [`exceptions`]: the exception resolver
//! - [`rewiring`]: the class remapper and rewriter
//! - [`emitters`]: per-instruction bytecode emitters
//! - [`runtime`]: class loader, interpreter and bridge
//! - [`executor`]: one-shot task execution
//!
//! # Example
//!
//! ```ignore
//! use djvm_core::config::SandboxConfiguration;
//! use djvm_core::executor::DeterministicSandboxExecutor;
//! use djvm_core::runtime::{HostValue, InMemoryClassSource};
//!
//! let source = Arc::new(InMemoryClassSource::from_classes(classes));
//! let executor = DeterministicSandboxExecutor::new(SandboxConfiguration::default(), source);
//! let summary = executor.run("com.example.Task", &HostValue::string("input"))?;
//! ```

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod config;
pub mod emitters;
pub mod errors;
pub mod exceptions;
pub mod executor;
pub mod resolver;
pub mod rewiring;
pub mod runtime;
pub mod well_known;
pub mod whitelist;

pub use config::{AnalysisConfiguration, ExecutionLimits, SandboxConfiguration};
pub use errors::{CacheError, SandboxError, TransformError};
pub use exceptions::ExceptionResolver;
pub use executor::{DeterministicSandboxExecutor, ExecutionSummary, Outcome};
pub use rewiring::{ClassRemapper, ClassRewriter};
pub use runtime::{HostValue, SandboxRuntime};
