//! Shadow exception naming.
//!
//! Every sandbox throwable `X` that is not a recognised host exception gets a
//! host-world shadow class `X$1DJVM`. Shadows are what actually travels
//! through the host's exception machinery, so their superclasses have to be
//! chosen so that catching works the same way it would inside the sandbox.

use crate::config::AnalysisConfiguration;
use crate::well_known::SHADOW_SUFFIX;
use std::sync::Arc;

/// The shadow class name for a sandbox exception class.
pub fn shadow_name_of(name: &str) -> String {
    format!("{}{}", name, SHADOW_SUFFIX)
}

pub fn is_shadow_exception(name: &str) -> bool {
    name.len() > SHADOW_SUFFIX.len() && name.ends_with(SHADOW_SUFFIX)
}

/// The sandbox class a shadow exception stands for. `None` when `shadow` is
/// not a shadow name.
pub fn host_owner_of(shadow: &str) -> Option<&str> {
    shadow
        .strip_suffix(SHADOW_SUFFIX)
        .filter(|owner| !owner.is_empty())
}

/// Whether a catch of `exception_type` (a pre-rewrite name) keeps its host
/// type rather than being retyped to a shadow.
pub fn catches_host_type(config: &AnalysisConfiguration, exception_type: &str) -> bool {
    let sandboxed = config.namespace().to_sandbox_internal(exception_type);
    config.is_jvm_exception(&sandboxed) || config.is_pinned(exception_type)
}

#[derive(Debug, Clone)]
pub struct ExceptionResolver {
    config: Arc<AnalysisConfiguration>,
}

impl ExceptionResolver {
    pub fn new(config: Arc<AnalysisConfiguration>) -> Self {
        Self { config }
    }

    /// Superclass for the shadow of a class whose (sandbox) superclass is
    /// `super_name`: the host class itself for recognised host exceptions,
    /// otherwise the superclass's own shadow.
    pub fn superclass_name_of(&self, super_name: &str) -> String {
        if self.config.is_jvm_exception(super_name) {
            self.config.namespace().from_sandbox_internal(super_name)
        } else {
            shadow_name_of(super_name)
        }
    }

    pub fn catches_host_type(&self, exception_type: &str) -> bool {
        catches_host_type(&self.config, exception_type)
    }

    /// Whether a sandbox class name has no shadow because it is a host exception.
    pub fn is_jvm_exception(&self, sandbox_name: &str) -> bool {
        self.config.is_jvm_exception(sandbox_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ExceptionResolver {
        ExceptionResolver::new(Arc::new(AnalysisConfiguration::default()))
    }

    #[test]
    fn test_shadow_name_round_trip() {
        for name in ["sandbox/com/example/MyException", "sandbox/Foo$Bar"] {
            let shadow = shadow_name_of(name);
            assert!(is_shadow_exception(&shadow));
            assert_eq!(host_owner_of(&shadow), Some(name));
        }
        assert!(!is_shadow_exception("sandbox/com/example/MyException"));
        assert!(!is_shadow_exception(SHADOW_SUFFIX));
        assert_eq!(host_owner_of("sandbox/com/example/MyException"), None);
        assert_eq!(host_owner_of(SHADOW_SUFFIX), None);
    }

    #[test]
    fn test_superclass_of_shadow() {
        let resolver = resolver();
        assert_eq!(
            resolver.superclass_name_of("sandbox/java/lang/Exception"),
            "java/lang/Exception"
        );
        assert_eq!(
            resolver.superclass_name_of("sandbox/com/example/MyBaseException"),
            "sandbox/com/example/MyBaseException$1DJVM"
        );
    }

    #[test]
    fn test_catches_host_type() {
        let resolver = resolver();
        assert!(resolver.catches_host_type("java/lang/Exception"));
        assert!(resolver.catches_host_type("java/lang/Throwable"));
        assert!(resolver.catches_host_type("djvm/rules/RuleViolationError"));
        assert!(!resolver.catches_host_type("com/example/MyBaseException"));
    }
}
