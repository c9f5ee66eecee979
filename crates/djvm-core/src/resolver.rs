//! Class-name resolution into the sandbox namespace.
//!
//! [`ClassResolver`] relocates class names, type names and descriptors. Pinned,
//! template and whitelisted names are left alone, as are names that already
//! carry the prefix, so every name comes out either untouched or prefixed
//! exactly once.

use crate::config::AnalysisConfiguration;
use djvm_types::descriptor::{self, DescriptorError};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ClassResolver {
    config: Arc<AnalysisConfiguration>,
}

impl ClassResolver {
    pub fn new(config: Arc<AnalysisConfiguration>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<AnalysisConfiguration> {
        &self.config
    }

    /// Relocate a plain internal class name.
    pub fn resolve(&self, internal_name: &str) -> String {
        let namespace = self.config.namespace();
        if self.config.is_exempt(internal_name) || namespace.is_sandboxed(internal_name) {
            internal_name.to_string()
        } else {
            namespace.to_sandbox_internal(internal_name)
        }
    }

    /// Relocate a type-instruction operand (class name or array descriptor).
    pub fn resolve_type(&self, type_name: &str) -> Result<String, DescriptorError> {
        descriptor::map_type_name(type_name, |name| self.resolve(name))
    }

    pub fn resolve_descriptor(&self, desc: &str) -> Result<String, DescriptorError> {
        descriptor::map_descriptor(desc, |name| self.resolve(name))
    }

    pub fn resolve_method_descriptor(&self, desc: &str) -> Result<String, DescriptorError> {
        descriptor::map_method_descriptor(desc, |name| self.resolve(name))
    }

    /// Host name of a sandbox class name. Names outside the namespace are
    /// returned unchanged.
    pub fn reverse(&self, internal_name: &str) -> String {
        self.config.namespace().from_sandbox_internal(internal_name)
    }

    /// Host spelling of a sandbox type name, arrays included.
    pub fn reverse_type(&self, type_name: &str) -> Result<String, DescriptorError> {
        descriptor::map_type_name(type_name, |name| self.reverse(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ClassResolver {
        ClassResolver::new(Arc::new(AnalysisConfiguration::default()))
    }

    #[test]
    fn test_resolve_relocates_ordinary_names_once() {
        let resolver = resolver();
        let once = resolver.resolve("com/example/Foo");
        assert_eq!(once, "sandbox/com/example/Foo");
        assert_eq!(resolver.resolve(&once), once);
    }

    #[test]
    fn test_exempt_names_are_untouched() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("java/lang/invoke/MethodHandle"), "java/lang/invoke/MethodHandle");
        assert_eq!(resolver.resolve("djvm/rules/RuleViolationError"), "djvm/rules/RuleViolationError");
        assert_eq!(resolver.resolve("sandbox/java/lang/DJVM"), "sandbox/java/lang/DJVM");
    }

    #[test]
    fn test_resolve_descriptors() {
        let resolver = resolver();
        assert_eq!(
            resolver
                .resolve_method_descriptor("(Ljava/lang/String;[Ljava/lang/Object;I)Ljava/util/List;")
                .unwrap(),
            "(Lsandbox/java/lang/String;[Lsandbox/java/lang/Object;I)Lsandbox/java/util/List;"
        );
        assert_eq!(
            resolver.resolve_type("[[Lcom/example/Foo;").unwrap(),
            "[[Lsandbox/com/example/Foo;"
        );
        assert!(resolver.resolve_descriptor("Lbroken").is_err());
    }

    #[test]
    fn test_reverse_type() {
        let resolver = resolver();
        assert_eq!(
            resolver.reverse_type("[Lsandbox/java/lang/String;").unwrap(),
            "[Ljava/lang/String;"
        );
        assert_eq!(resolver.reverse("sandbox/com/example/Foo"), "com/example/Foo");
    }
}
