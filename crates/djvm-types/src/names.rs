//! Class-name utilities and the sandbox namespace.
//!
//! Class names appear in two spellings:
//! - **binary** names use dots (`java.lang.String`), as seen by reflection-style APIs
//! - **internal** names use slashes (`java/lang/String`), as seen in bytecode
//!
//! A [`Namespace`] relocates names under a prefix so that sandboxed classes live
//! in a hierarchy of their own. Both directions are idempotent: applying
//! [`Namespace::to_sandbox_internal`] twice is the same as applying it once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default namespace prefix for sandboxed classes.
pub const DEFAULT_SANDBOX_PREFIX: &str = "sandbox";

/// Convert a binary class name (`a.b.C`) into an internal name (`a/b/C`).
pub fn to_internal_name(binary_name: &str) -> String {
    binary_name.replace('.', "/")
}

/// Convert an internal class name (`a/b/C`) into a binary name (`a.b.C`).
pub fn to_binary_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Errors raised when constructing a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("namespace prefix must not be empty")]
    Empty,
    #[error("invalid namespace segment '{segment}' in prefix '{prefix}'")]
    InvalidSegment { prefix: String, segment: String },
}

/// The isolated package hierarchy that sandboxed classes are moved into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    /// Prefix without a trailing separator, e.g. `sandbox` or `det/box`.
    root: String,
    /// `root` + `/`
    internal_prefix: String,
    /// `root` (dotted) + `.`
    binary_prefix: String,
}

impl Namespace {
    /// Create a namespace from a prefix such as `sandbox`, `sandbox/` or `sandbox.`.
    pub fn new(prefix: &str) -> Result<Self, NamespaceError> {
        let root = prefix.trim_end_matches(['/', '.']).replace('.', "/");
        if root.is_empty() {
            return Err(NamespaceError::Empty);
        }
        for segment in root.split('/') {
            if !is_identifier(segment) {
                return Err(NamespaceError::InvalidSegment {
                    prefix: prefix.to_string(),
                    segment: segment.to_string(),
                });
            }
        }
        Ok(Self {
            internal_prefix: format!("{}/", root),
            binary_prefix: format!("{}.", to_binary_name(&root)),
            root,
        })
    }

    /// The prefix in internal form, including the trailing `/`.
    pub fn internal_prefix(&self) -> &str {
        &self.internal_prefix
    }

    /// The prefix in binary form, including the trailing `.`.
    pub fn binary_prefix(&self) -> &str {
        &self.binary_prefix
    }

    /// Move a binary class name into the sandbox. Idempotent.
    pub fn to_sandbox_package(&self, binary_name: &str) -> String {
        if binary_name.starts_with(&self.binary_prefix) {
            binary_name.to_string()
        } else {
            format!("{}{}", self.binary_prefix, binary_name)
        }
    }

    /// Take a binary class name out of the sandbox. Names outside the sandbox are returned unchanged.
    pub fn from_sandbox_package(&self, binary_name: &str) -> String {
        binary_name
            .strip_prefix(&self.binary_prefix)
            .unwrap_or(binary_name)
            .to_string()
    }

    /// Move an internal class name into the sandbox. Idempotent.
    pub fn to_sandbox_internal(&self, internal_name: &str) -> String {
        if self.is_sandboxed(internal_name) {
            internal_name.to_string()
        } else {
            format!("{}{}", self.internal_prefix, internal_name)
        }
    }

    /// Take an internal class name out of the sandbox. Names outside the sandbox are returned unchanged.
    pub fn from_sandbox_internal(&self, internal_name: &str) -> String {
        internal_name
            .strip_prefix(&self.internal_prefix)
            .unwrap_or(internal_name)
            .to_string()
    }

    /// Whether an internal name already lives inside the sandbox.
    pub fn is_sandboxed(&self, internal_name: &str) -> bool {
        internal_name.starts_with(&self.internal_prefix)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            root: DEFAULT_SANDBOX_PREFIX.to_string(),
            internal_prefix: format!("{}/", DEFAULT_SANDBOX_PREFIX),
            binary_prefix: format!("{}.", DEFAULT_SANDBOX_PREFIX),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)
    }
}

impl TryFrom<String> for Namespace {
    type Error = NamespaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Namespace::new(&value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.root
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
