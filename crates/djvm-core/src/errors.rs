//! Error types for rewriting and sandboxed execution.
//!
//! [`TransformError`] aborts the build of a single class. [`SandboxError`] is
//! the result of running sandboxed code: [`SandboxError::Thrown`] is an
//! ordinary thrown object that bytecode handlers may catch, every other variant
//! is a hard failure that unwinds straight out of the interpreter.

use crate::runtime::object::ObjectRef;
use djvm_types::bytecode::Label;
use djvm_types::DescriptorError;

/// Failures while rewriting a class.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A handler label was declared twice with different exception types.
    #[error("handler {label} registered for '{existing}' and '{requested}'")]
    ConflictingHandler {
        label: Label,
        existing: String,
        requested: String,
    },

    /// A try block names a handler label that the pass has already emitted.
    #[error("handler {label} registered after its label was visited")]
    HandlerAfterLabel { label: Label },

    #[error("{class}.{method}{descriptor}: {source}")]
    InMethod {
        class: String,
        method: String,
        descriptor: String,
        #[source]
        source: Box<TransformError>,
    },
}

/// Failures raised by the named-cache layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache name '{0}'")]
    InvalidName(String),
    #[error("unknown cache '{0}'")]
    UnknownCache(String),
}

/// Outcome of a failed sandbox operation.
#[derive(Debug, Clone)]
pub enum SandboxError {
    /// A throwable propagating through bytecode. Always a host-world object.
    Thrown(ObjectRef),

    /// A class could not be resolved, or was refused by the denylist.
    ClassNotFound(String),

    /// A conversion across the sandbox boundary failed. Not catchable.
    RuleViolation(String),

    /// The instruction budget or call-depth bound was exceeded. Not catchable.
    ThresholdExceeded(String),

    NoSuchMethod {
        owner: String,
        name: String,
        descriptor: String,
    },

    NoSuchField {
        owner: String,
        name: String,
    },

    /// Malformed code: stack underflow, wrong operand kinds, unknown labels.
    Verification(String),

    Transform(TransformError),

    Cache(CacheError),
}

impl SandboxError {
    /// Whether bytecode exception handlers may intercept this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self, SandboxError::Thrown(_))
    }

    pub fn thrown(&self) -> Option<&ObjectRef> {
        match self {
            SandboxError::Thrown(obj) => Some(obj),
            _ => None,
        }
    }

    pub(crate) fn verification(message: impl Into<String>) -> Self {
        SandboxError::Verification(message.into())
    }
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::Thrown(obj) => {
                write!(f, "Thrown: {}", obj.class_name())?;
                if let Some(message) = obj.throwable_message() {
                    write!(f, ": {}", message)?;
                }
                Ok(())
            }
            SandboxError::ClassNotFound(name) => write!(f, "ClassNotFound: {}", name),
            SandboxError::RuleViolation(message) => write!(f, "RuleViolation: {}", message),
            SandboxError::ThresholdExceeded(message) => {
                write!(f, "ThresholdExceeded: {}", message)
            }
            SandboxError::NoSuchMethod {
                owner,
                name,
                descriptor,
            } => write!(f, "NoSuchMethod: {}.{}{}", owner, name, descriptor),
            SandboxError::NoSuchField { owner, name } => {
                write!(f, "NoSuchField: {}.{}", owner, name)
            }
            SandboxError::Verification(message) => write!(f, "VerifyError: {}", message),
            SandboxError::Transform(err) => write!(f, "TransformError: {}", err),
            SandboxError::Cache(err) => write!(f, "CacheError: {}", err),
        }
    }
}

impl std::error::Error for SandboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SandboxError::Transform(err) => Some(err),
            SandboxError::Cache(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransformError> for SandboxError {
    fn from(err: TransformError) -> Self {
        SandboxError::Transform(err)
    }
}

impl From<CacheError> for SandboxError {
    fn from(err: CacheError) -> Self {
        SandboxError::Cache(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_display() {
        let err = TransformError::InMethod {
            class: "com/example/Foo".into(),
            method: "run".into(),
            descriptor: "()V".into(),
            source: Box::new(TransformError::ConflictingHandler {
                label: Label(3),
                existing: "java/lang/Exception".into(),
                requested: String::new(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "com/example/Foo.run()V: handler L3 registered for 'java/lang/Exception' and ''"
        );
    }

    #[test]
    fn test_hard_errors_are_not_catchable() {
        assert!(!SandboxError::RuleViolation("x".into()).is_catchable());
        assert!(!SandboxError::ThresholdExceeded("x".into()).is_catchable());
        assert_eq!(
            SandboxError::ClassNotFound("java.lang.DJVM".into()).to_string(),
            "ClassNotFound: java.lang.DJVM"
        );
    }
}
