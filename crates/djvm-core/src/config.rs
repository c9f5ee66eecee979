//! Sandbox configuration.
//!
//! [`AnalysisConfiguration`] classifies class names for the rewriter: which
//! ones are pinned, template or whitelisted (left untouched), which host
//! exceptions keep their identity, and which binary names `class_for_name`
//! refuses. It is immutable once built and shared by `Arc` between passes and
//! threads.
//!
//! [`SandboxConfiguration`] adds what a running sandbox needs on top of that:
//! execution limits and the named-cache factory.

use crate::cache::{NamedCacheFactory, SandboxCacheFactory};
use crate::well_known::{self, host, sandbox};
use crate::whitelist::ClassPatterns;
use anyhow::{Context, Result};
use djvm_types::{Namespace, NamespaceError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error("invalid class pattern: {0}")]
    Pattern(#[from] regex::Error),
}

// =============================================================================
// Analysis configuration
// =============================================================================

#[derive(Debug)]
pub struct AnalysisConfiguration {
    namespace: Namespace,
    /// Host exception name -> host superclass name.
    jvm_exceptions: BTreeMap<String, String>,
    /// Sandbox-prefixed names of `jvm_exceptions`.
    jvm_exception_classes: BTreeSet<String>,
    pinned_classes: BTreeSet<String>,
    template_classes: BTreeSet<String>,
    whitelist: ClassPatterns,
    banned_classes: ClassPatterns,
    names: BridgeNames,
}

impl AnalysisConfiguration {
    /// A builder seeded with the built-in defaults.
    pub fn builder() -> AnalysisConfigurationBuilder {
        AnalysisConfigurationBuilder::default()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn names(&self) -> &BridgeNames {
        &self.names
    }

    /// Whether a sandbox-prefixed internal name is a recognised host exception.
    pub fn is_jvm_exception(&self, sandbox_name: &str) -> bool {
        self.jvm_exception_classes.contains(sandbox_name)
    }

    /// Sandbox-prefixed names of the recognised host exceptions.
    pub fn jvm_exception_classes(&self) -> impl Iterator<Item = &str> {
        self.jvm_exception_classes.iter().map(String::as_str)
    }

    /// Recognised host exceptions with their host superclass, superclass-first
    /// order not guaranteed.
    pub fn jvm_exceptions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.jvm_exceptions
            .iter()
            .map(|(name, super_name)| (name.as_str(), super_name.as_str()))
    }

    pub fn is_pinned(&self, internal_name: &str) -> bool {
        self.pinned_classes.contains(internal_name)
    }

    pub fn is_template(&self, internal_name: &str) -> bool {
        self.template_classes.contains(internal_name)
    }

    pub fn is_whitelisted(&self, internal_name: &str) -> bool {
        self.whitelist.is_match(internal_name)
    }

    /// Pinned, template and whitelisted names are never relocated.
    pub fn is_exempt(&self, internal_name: &str) -> bool {
        self.is_pinned(internal_name)
            || self.is_template(internal_name)
            || self.is_whitelisted(internal_name)
    }

    /// Whether `class_for_name` must refuse a binary name.
    pub fn is_banned(&self, binary_name: &str) -> bool {
        self.banned_classes.is_match(binary_name)
    }

    pub fn pinned_classes(&self) -> impl Iterator<Item = &str> {
        self.pinned_classes.iter().map(String::as_str)
    }

    pub fn template_classes(&self) -> impl Iterator<Item = &str> {
        self.template_classes.iter().map(String::as_str)
    }

    pub fn whitelist(&self) -> &ClassPatterns {
        &self.whitelist
    }

    pub fn banned_classes(&self) -> &ClassPatterns {
        &self.banned_classes
    }

    /// A serialisable description of the effective configuration.
    pub fn to_config_file(&self) -> ConfigFile {
        ConfigFile {
            namespace: Some(self.namespace.to_string()),
            jvm_exceptions: self.jvm_exceptions.clone(),
            pinned_classes: self.pinned_classes.iter().cloned().collect(),
            template_classes: self.template_classes.iter().cloned().collect(),
            whitelist: self.whitelist.patterns().to_vec(),
            banned_classes: self.banned_classes.patterns().to_vec(),
            limits: None,
            default_cache_size: None,
            no_defaults: true,
        }
    }
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        // The built-in defaults are static and always valid.
        match AnalysisConfigurationBuilder::default().build() {
            Ok(config) => config,
            Err(err) => unreachable!("built-in configuration is invalid: {err}"),
        }
    }
}

/// Builder for [`AnalysisConfiguration`].
///
/// Pinned and template names are given relative to the namespace when they
/// live in it (`java/lang/DJVM`) and as-is otherwise. Use
/// [`with_sandbox_pinned_class`](Self::with_sandbox_pinned_class) for the former.
#[derive(Debug, Clone)]
pub struct AnalysisConfigurationBuilder {
    namespace: String,
    jvm_exceptions: BTreeMap<String, String>,
    pinned_host: Vec<String>,
    pinned_sandbox: Vec<String>,
    templates: Vec<String>,
    whitelist: Vec<String>,
    banned: Vec<String>,
}

impl Default for AnalysisConfigurationBuilder {
    fn default() -> Self {
        Self {
            namespace: djvm_types::names::DEFAULT_SANDBOX_PREFIX.to_string(),
            jvm_exceptions: well_known::DEFAULT_JVM_EXCEPTIONS
                .iter()
                .map(|(name, super_name)| (name.to_string(), super_name.to_string()))
                .collect(),
            pinned_host: to_strings(well_known::DEFAULT_PINNED_HOST_CLASSES),
            pinned_sandbox: to_strings(well_known::DEFAULT_PINNED_SANDBOX_CLASSES),
            templates: to_strings(well_known::DEFAULT_TEMPLATE_CLASSES),
            whitelist: to_strings(well_known::DEFAULT_WHITELIST),
            banned: to_strings(well_known::DEFAULT_BANNED_CLASSES),
        }
    }
}

impl AnalysisConfigurationBuilder {
    /// A builder with no recognised exceptions, pins, templates or patterns
    /// beyond the runtime bridge classes, which are always pinned.
    pub fn bare() -> Self {
        Self {
            namespace: djvm_types::names::DEFAULT_SANDBOX_PREFIX.to_string(),
            jvm_exceptions: BTreeMap::new(),
            pinned_host: Vec::new(),
            pinned_sandbox: to_strings(well_known::DEFAULT_PINNED_SANDBOX_CLASSES),
            templates: Vec::new(),
            whitelist: Vec::new(),
            banned: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>) -> Self {
        self.namespace = prefix.into();
        self
    }

    /// Recognise a host exception. `super_name` is its host superclass.
    pub fn with_jvm_exception(mut self, name: impl Into<String>, super_name: impl Into<String>) -> Self {
        self.jvm_exceptions.insert(name.into(), super_name.into());
        self
    }

    /// Pin a class outside the namespace.
    pub fn with_pinned_class(mut self, name: impl Into<String>) -> Self {
        self.pinned_host.push(name.into());
        self
    }

    /// Pin a class inside the namespace, named relative to it.
    pub fn with_sandbox_pinned_class(mut self, name: impl Into<String>) -> Self {
        self.pinned_sandbox.push(name.into());
        self
    }

    /// Register a template class, named relative to the namespace.
    pub fn with_template_class(mut self, name: impl Into<String>) -> Self {
        self.templates.push(name.into());
        self
    }

    pub fn with_whitelist_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.whitelist.push(pattern.into());
        self
    }

    pub fn with_banned_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.banned.push(pattern.into());
        self
    }

    pub fn build(self) -> Result<AnalysisConfiguration, ConfigError> {
        let namespace = Namespace::new(&self.namespace)?;
        let jvm_exception_classes = self
            .jvm_exceptions
            .keys()
            .map(|name| namespace.to_sandbox_internal(name))
            .collect();
        let mut pinned_classes: BTreeSet<String> = self.pinned_host.into_iter().collect();
        pinned_classes.extend(
            self.pinned_sandbox
                .iter()
                .map(|name| namespace.to_sandbox_internal(name)),
        );
        let template_classes = self
            .templates
            .iter()
            .map(|name| namespace.to_sandbox_internal(name))
            .collect();
        let whitelist = ClassPatterns::new(self.whitelist)?;
        let banned_classes = ClassPatterns::new(self.banned)?;
        let names = BridgeNames::new(&namespace);

        Ok(AnalysisConfiguration {
            namespace,
            jvm_exceptions: self.jvm_exceptions,
            jvm_exception_classes,
            pinned_classes,
            template_classes,
            whitelist,
            banned_classes,
            names,
        })
    }
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

// =============================================================================
// Bridge names
// =============================================================================

/// Namespace-qualified names and descriptors used by the emitters and the
/// runtime bridge, computed once per configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeNames {
    pub djvm: String,
    pub djvm_exception: String,
    pub throwable_wrapper: String,
    pub object: String,
    pub string: String,
    pub throwable: String,
    pub enum_class: String,
    pub list: String,
    pub array_list: String,
    /// `(Ljava/lang/Throwable;)L<ns>/java/lang/Throwable;`
    pub to_djvm_descriptor: String,
    /// `(L<ns>/java/lang/Throwable;)Ljava/lang/Throwable;`
    pub from_djvm_descriptor: String,
    /// `(Ljava/lang/Throwable;)Ljava/lang/Throwable;`
    pub check_catch_descriptor: String,
    /// `(Ljava/lang/String;)L<ns>/java/lang/String;`
    pub string_to_djvm_descriptor: String,
    /// `(L<ns>/java/lang/String;)V`
    pub message_constructor: String,
}

impl BridgeNames {
    pub fn new(namespace: &Namespace) -> Self {
        let sandboxed = |name: &str| namespace.to_sandbox_internal(name);
        let throwable = sandboxed(host::THROWABLE);
        let string = sandboxed(host::STRING);
        Self {
            djvm: sandboxed(sandbox::DJVM),
            djvm_exception: sandboxed(sandbox::DJVM_EXCEPTION),
            throwable_wrapper: sandboxed(sandbox::THROWABLE_WRAPPER),
            object: sandboxed(host::OBJECT),
            enum_class: sandboxed(host::ENUM),
            list: sandboxed(sandbox::LIST),
            array_list: sandboxed(sandbox::ARRAY_LIST),
            to_djvm_descriptor: format!("(L{};)L{};", host::THROWABLE, throwable),
            from_djvm_descriptor: format!("(L{};)L{};", throwable, host::THROWABLE),
            check_catch_descriptor: format!("(L{};)L{};", host::THROWABLE, host::THROWABLE),
            string_to_djvm_descriptor: format!("(L{};)L{};", host::STRING, string),
            message_constructor: format!("(L{};)V", string),
            throwable,
            string,
        }
    }
}

// =============================================================================
// Execution limits and sandbox configuration
// =============================================================================

/// Bounds that keep sandboxed execution finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Instructions executed across the whole run.
    pub max_instructions: u64,
    /// Nested method invocations, natives included.
    pub max_call_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_call_depth: 256,
        }
    }
}

/// Everything a sandbox runtime is configured with.
#[derive(Clone)]
pub struct SandboxConfiguration {
    pub analysis: Arc<AnalysisConfiguration>,
    pub cache_factory: Arc<dyn NamedCacheFactory>,
    pub limits: ExecutionLimits,
}

impl Default for SandboxConfiguration {
    fn default() -> Self {
        Self {
            analysis: Arc::new(AnalysisConfiguration::default()),
            cache_factory: Arc::new(SandboxCacheFactory::default()),
            limits: ExecutionLimits::default(),
        }
    }
}

impl std::fmt::Debug for SandboxConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxConfiguration")
            .field("namespace", self.analysis.namespace())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl SandboxConfiguration {
    pub fn new(analysis: AnalysisConfiguration) -> Self {
        Self {
            analysis: Arc::new(analysis),
            ..Default::default()
        }
    }

    /// Builder method: set execution limits.
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builder method: set the named-cache factory.
    pub fn with_cache_factory(mut self, factory: Arc<dyn NamedCacheFactory>) -> Self {
        self.cache_factory = factory;
        self
    }

    /// Load a configuration file and apply it on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        ConfigFile::load(path)?.into_configuration()
    }
}

// =============================================================================
// Configuration file
// =============================================================================

/// JSON form of a sandbox configuration. Lists extend the built-in defaults
/// unless `no_defaults` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub namespace: Option<String>,
    /// Host exception name -> host superclass name.
    pub jvm_exceptions: BTreeMap<String, String>,
    /// Full internal names, sandbox-prefixed where applicable.
    pub pinned_classes: Vec<String>,
    /// Full internal names, sandbox-prefixed.
    pub template_classes: Vec<String>,
    pub whitelist: Vec<String>,
    pub banned_classes: Vec<String>,
    pub limits: Option<ExecutionLimits>,
    /// Capacity used for every cache when set; otherwise the runtime's own
    /// unbounded caches are used.
    pub default_cache_size: Option<u64>,
    pub no_defaults: bool,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn analysis_configuration(&self) -> Result<AnalysisConfiguration> {
        let mut builder = if self.no_defaults {
            AnalysisConfigurationBuilder::bare()
        } else {
            AnalysisConfigurationBuilder::default()
        };
        if let Some(namespace) = &self.namespace {
            builder = builder.with_namespace(namespace.clone());
        }
        let namespace = Namespace::new(&builder.namespace)
            .with_context(|| format!("Invalid namespace '{}'", builder.namespace))?;
        for (name, super_name) in &self.jvm_exceptions {
            builder = builder.with_jvm_exception(name.clone(), super_name.clone());
        }
        for name in &self.pinned_classes {
            builder = if namespace.is_sandboxed(name) {
                builder.with_sandbox_pinned_class(namespace.from_sandbox_internal(name))
            } else {
                builder.with_pinned_class(name.clone())
            };
        }
        for name in &self.template_classes {
            builder = builder.with_template_class(namespace.from_sandbox_internal(name));
        }
        for pattern in &self.whitelist {
            builder = builder.with_whitelist_pattern(pattern.clone());
        }
        for pattern in &self.banned_classes {
            builder = builder.with_banned_pattern(pattern.clone());
        }
        builder.build().context("Invalid analysis configuration")
    }

    pub fn into_configuration(self) -> Result<SandboxConfiguration> {
        let analysis = self.analysis_configuration()?;
        let mut config = SandboxConfiguration::new(analysis);
        if let Some(limits) = self.limits {
            config = config.with_limits(limits);
        }
        if let Some(size) = self.default_cache_size {
            config = config.with_cache_factory(Arc::new(crate::cache::DefaultSizedCacheFactory::new(size)));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_classification() {
        let config = AnalysisConfiguration::default();
        assert_eq!(config.namespace().internal_prefix(), "sandbox/");
        assert!(config.is_jvm_exception("sandbox/java/lang/Exception"));
        assert!(!config.is_jvm_exception("java/lang/Exception"));
        assert!(!config.is_jvm_exception("sandbox/com/example/MyException"));
        assert!(config.is_pinned("sandbox/java/lang/DJVM"));
        assert!(config.is_pinned("djvm/rules/RuleViolationError"));
        assert!(config.is_template("sandbox/java/lang/String"));
        assert!(config.is_whitelisted("java/lang/invoke/LambdaMetafactory"));
        assert!(config.is_banned("java.lang.DJVM"));
        assert!(!config.is_banned("com.example.Task"));
    }

    #[test]
    fn test_bridge_names_follow_namespace() {
        let config = AnalysisConfiguration::builder()
            .with_namespace("det")
            .build()
            .unwrap();
        let names = config.names();
        assert_eq!(names.djvm, "det/java/lang/DJVM");
        assert_eq!(
            names.to_djvm_descriptor,
            "(Ljava/lang/Throwable;)Ldet/java/lang/Throwable;"
        );
        assert_eq!(
            names.string_to_djvm_descriptor,
            "(Ljava/lang/String;)Ldet/java/lang/String;"
        );
        assert!(config.is_pinned("det/java/lang/ThrowableWrapper"));
        assert!(config.is_jvm_exception("det/java/lang/RuntimeException"));
    }

    #[test]
    fn test_bare_builder_keeps_bridge_pins() {
        let config = AnalysisConfigurationBuilder::bare().build().unwrap();
        assert!(config.is_pinned("sandbox/java/lang/DJVM"));
        assert!(!config.is_jvm_exception("sandbox/java/lang/Exception"));
        assert!(!config.is_whitelisted("java/lang/invoke/MethodHandle"));
    }

    #[test]
    fn test_invalid_builder_inputs() {
        assert!(matches!(
            AnalysisConfiguration::builder().with_namespace("").build(),
            Err(ConfigError::Namespace(_))
        ));
        assert!(matches!(
            AnalysisConfiguration::builder()
                .with_banned_pattern("[")
                .build(),
            Err(ConfigError::Pattern(_))
        ));
    }

    #[test]
    fn test_config_file_extends_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "jvm_exceptions": {{ "java/io/IOException": "java/lang/Exception" }},
                "pinned_classes": ["com/example/Pinned", "sandbox/com/example/Bridge"],
                "banned_classes": ["^com\\.example\\.Secret$"],
                "limits": {{ "max_instructions": 500 }}
            }}"#
        )
        .unwrap();
        let config = SandboxConfiguration::from_file(file.path()).unwrap();
        assert_eq!(config.limits.max_instructions, 500);
        assert_eq!(config.limits.max_call_depth, 256);
        let analysis = &config.analysis;
        assert!(analysis.is_jvm_exception("sandbox/java/io/IOException"));
        assert!(analysis.is_jvm_exception("sandbox/java/lang/Exception"));
        assert!(analysis.is_pinned("com/example/Pinned"));
        assert!(analysis.is_pinned("sandbox/com/example/Bridge"));
        assert!(analysis.is_banned("com.example.Secret"));
        assert!(analysis.is_banned("Task"));
    }

    #[test]
    fn test_config_file_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "namespaces": "x" }}"#).unwrap();
        let err = ConfigFile::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_effective_config_round_trip() {
        let config = AnalysisConfiguration::default();
        let file = config.to_config_file();
        let rebuilt = file.analysis_configuration().unwrap();
        assert_eq!(
            rebuilt.pinned_classes().collect::<Vec<_>>(),
            config.pinned_classes().collect::<Vec<_>>()
        );
        assert_eq!(
            rebuilt.jvm_exception_classes().collect::<Vec<_>>(),
            config.jvm_exception_classes().collect::<Vec<_>>()
        );
        assert_eq!(rebuilt.whitelist(), config.whitelist());
        assert_eq!(rebuilt.banned_classes(), config.banned_classes());
    }
}
