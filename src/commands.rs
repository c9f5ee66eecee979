//! Subcommand implementations.
//!
//! Each command returns the JSON document it prints, so the binary and the
//! tests share one code path.

use crate::args::{NamesArgs, RewriteArgs, RunArgs};
use anyhow::{anyhow, Context, Result};
use djvm_core::config::SandboxConfiguration;
use djvm_core::exceptions::{catches_host_type, shadow_name_of};
use djvm_core::executor::DeterministicSandboxExecutor;
use djvm_core::resolver::ClassResolver;
use djvm_core::rewiring::ClassRewriter;
use djvm_core::runtime::{HostValue, InMemoryClassSource};
use djvm_types::bytecode::ClassFile;
use djvm_types::names::{to_binary_name, to_internal_name};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The built-in configuration, or `path` applied on top of it.
pub fn load_configuration(path: Option<&Path>) -> Result<SandboxConfiguration> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            SandboxConfiguration::from_file(path)
        }
        None => Ok(SandboxConfiguration::default()),
    }
}

/// Read one class, or an array of classes, from a JSON file.
pub fn load_classes(path: &Path) -> Result<Vec<ClassFile>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read classes from {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
    let classes = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|class| vec![class])
    };
    classes.with_context(|| format!("{} does not hold class files", path.display()))
}

pub fn rewrite(config: &SandboxConfiguration, args: &RewriteArgs) -> Result<Value> {
    let classes = load_classes(&args.classes)?;
    let rewriter = ClassRewriter::new(config.analysis.clone());
    let rewritten = rewriter
        .rewrite_all(&classes)
        .into_iter()
        .zip(&classes)
        .map(|(result, class)| result.with_context(|| format!("Failed to rewrite {}", class.name)))
        .collect::<Result<Vec<_>>>()?;
    info!(classes = rewritten.len(), "rewrote classes");

    let output = if args.digest_only {
        let digests = classes
            .iter()
            .zip(&rewritten)
            .map(|(original, class)| {
                Ok(json!({
                    "name": original.name,
                    "sandbox_name": class.name,
                    "digest": class.digest()?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        Value::Array(digests)
    } else {
        serde_json::to_value(&rewritten)?
    };

    match &args.out {
        Some(path) => {
            let text = serde_json::to_string_pretty(&output)?;
            std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(json!({
                "success": true,
                "classes": rewritten.len(),
                "out": path.display().to_string(),
            }))
        }
        None => Ok(output),
    }
}

pub fn names(config: &SandboxConfiguration, args: &NamesArgs) -> Value {
    let analysis = &config.analysis;
    let resolver = ClassResolver::new(analysis.clone());
    let entries = args
        .names
        .iter()
        .map(|name| {
            let internal = if name.contains('.') {
                to_internal_name(name)
            } else {
                name.clone()
            };
            let sandboxed = resolver.resolve(&internal);
            let catch_type = if catches_host_type(analysis, &internal) {
                internal.clone()
            } else {
                shadow_name_of(&sandboxed)
            };
            json!({
                "name": name,
                "internal": internal,
                "sandbox": sandboxed,
                "sandbox_binary": to_binary_name(&sandboxed),
                "exempt": analysis.is_exempt(&internal),
                "banned": analysis.is_banned(&to_binary_name(&internal)),
                "catch_type": catch_type,
            })
        })
        .collect();
    Value::Array(entries)
}

pub fn config(config: &SandboxConfiguration) -> Result<Value> {
    let mut file = config.analysis.to_config_file();
    file.limits = Some(config.limits);
    Ok(serde_json::to_value(file)?)
}

pub fn run(config: &SandboxConfiguration, args: &RunArgs) -> Result<Value> {
    let input: HostValue = serde_json::from_str(&args.input)
        .with_context(|| format!("Invalid input value '{}'", args.input))?;
    let source = Arc::new(InMemoryClassSource::from_classes(load_classes(&args.classes)?));
    let executor = DeterministicSandboxExecutor::new(config.clone(), source);
    let summary = executor
        .run(&args.class_name, &input)
        .map_err(|err| anyhow!("Task {} failed: {}", args.class_name, err))?;
    Ok(serde_json::to_value(summary)?)
}
