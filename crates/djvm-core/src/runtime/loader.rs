//! Per-sandbox class loading.
//!
//! A [`SandboxClassLoader`] is the class namespace of one sandbox runtime.
//! Names resolve in this order:
//!
//! 1. array classes are synthesised from their component class
//! 2. runtime-library classes come from the bootstrap set
//! 3. shadow exceptions (`X$1DJVM`) are synthesised from the sandbox class `X`
//! 4. sandbox names are stripped of the prefix, found in the [`ClassSource`]
//!    and rewritten into the namespace
//! 5. any other name is a host class, taken from the source untransformed

use super::class::{ObjectKind, RuntimeClass};
use super::library;
use crate::config::AnalysisConfiguration;
use crate::errors::SandboxError;
use crate::exceptions::{host_owner_of, is_shadow_exception, ExceptionResolver};
use crate::rewiring::ClassRewriter;
use crate::well_known::host;
use djvm_types::bytecode::ClassFile;
use djvm_types::descriptor::{array_of, FieldType};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, trace};

/// Where host classes come from.
pub trait ClassSource: Send + Sync {
    /// Look up a class by host internal name.
    fn find_class(&self, internal_name: &str) -> Option<ClassFile>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryClassSource {
    classes: HashMap<String, ClassFile>,
}

impl InMemoryClassSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_classes(classes: impl IntoIterator<Item = ClassFile>) -> Self {
        Self {
            classes: classes.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn insert(&mut self, class: ClassFile) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for InMemoryClassSource {
    fn find_class(&self, internal_name: &str) -> Option<ClassFile> {
        self.classes.get(internal_name).cloned()
    }
}

pub struct SandboxClassLoader {
    config: Arc<AnalysisConfiguration>,
    rewriter: ClassRewriter,
    exceptions: ExceptionResolver,
    bootstrap: HashMap<String, ClassFile>,
    source: Arc<dyn ClassSource>,
    classes: RwLock<HashMap<String, Arc<RuntimeClass>>>,
    /// Classes each thread is in the middle of defining.
    defining: Mutex<HashSet<(ThreadId, String)>>,
}

/// Marks a class as being defined by the current thread until dropped.
struct DefiningGuard<'a> {
    defining: &'a Mutex<HashSet<(ThreadId, String)>>,
    key: (ThreadId, String),
}

impl Drop for DefiningGuard<'_> {
    fn drop(&mut self) {
        self.defining.lock().remove(&self.key);
    }
}

impl SandboxClassLoader {
    pub fn new(config: Arc<AnalysisConfiguration>, source: Arc<dyn ClassSource>) -> Self {
        let bootstrap = library::bootstrap_classes(&config)
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self {
            rewriter: ClassRewriter::new(config.clone()),
            exceptions: ExceptionResolver::new(config.clone()),
            config,
            bootstrap,
            source,
            classes: RwLock::new(HashMap::new()),
            defining: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &Arc<AnalysisConfiguration> {
        &self.config
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn loaded_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Names of every loaded class, sorted.
    pub fn loaded_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>, SandboxError> {
        if let Some(class) = self.classes.read().get(name) {
            return Ok(class.clone());
        }

        let namespace = self.config.namespace();
        let class = if name.starts_with('[') {
            self.synthesize_array(name)?
        } else if let Some(class_file) = self.bootstrap.get(name) {
            self.define(class_file.clone())?
        } else if is_shadow_exception(name) {
            self.synthesize_shadow(name)?
        } else if namespace.is_sandboxed(name) {
            let host_name = namespace.from_sandbox_internal(name);
            let class_file = self
                .source
                .find_class(&host_name)
                .ok_or_else(|| SandboxError::ClassNotFound(name.to_string()))?;
            let rewritten = self.rewriter.rewrite(&class_file)?;
            if rewritten.name != name {
                // The source class is exempt from relocation.
                return Err(SandboxError::ClassNotFound(name.to_string()));
            }
            self.define(rewritten)?
        } else {
            let class_file = self
                .source
                .find_class(name)
                .ok_or_else(|| SandboxError::ClassNotFound(name.to_string()))?;
            self.define(class_file)?
        };
        debug!(class = %name, "loaded class");
        Ok(class)
    }

    fn define(&self, class_file: ClassFile) -> Result<Arc<RuntimeClass>, SandboxError> {
        let _guard = self.begin_define(&class_file.name)?;
        let super_class = class_file
            .super_name
            .as_deref()
            .map(|s| self.load_class(s))
            .transpose()?;
        let interfaces = class_file
            .interfaces
            .iter()
            .map(|i| self.load_class(i))
            .collect::<Result<Vec<_>, _>>()?;
        let class = Arc::new(RuntimeClass::link(
            &class_file,
            super_class,
            &interfaces,
            self.kind_of(&class_file.name),
        )?);
        let mut classes = self.classes.write();
        Ok(classes.entry(class_file.name).or_insert(class).clone())
    }

    /// Fails when the current thread is already defining `name`: the class
    /// is its own ancestor.
    fn begin_define(&self, name: &str) -> Result<DefiningGuard<'_>, SandboxError> {
        let key = (std::thread::current().id(), name.to_string());
        if !self.defining.lock().insert(key.clone()) {
            return Err(SandboxError::verification(format!(
                "circular class hierarchy at {}",
                name
            )));
        }
        Ok(DefiningGuard {
            defining: &self.defining,
            key,
        })
    }

    fn kind_of(&self, name: &str) -> Option<ObjectKind> {
        let names = self.config.names();
        if name == host::THROWABLE || name == names.throwable {
            Some(ObjectKind::Throwable)
        } else if name == names.array_list {
            Some(ObjectKind::List)
        } else {
            None
        }
    }

    /// `X$1DJVM`: extends the shadow of `X`'s superclass, or the host class when
    /// that superclass is a recognised host exception.
    fn synthesize_shadow(&self, name: &str) -> Result<Arc<RuntimeClass>, SandboxError> {
        let not_found = || SandboxError::ClassNotFound(name.to_string());
        let owner = host_owner_of(name).ok_or_else(not_found)?;
        let owner_class = self.load_class(owner)?;
        if !owner_class.is_subtype_of(&self.config.names().throwable) {
            return Err(not_found());
        }
        let owner_super = owner_class.super_name().ok_or_else(not_found)?;
        let super_name = self.exceptions.superclass_name_of(owner_super);
        trace!(shadow = %name, super_name = %super_name, "synthesizing shadow exception");
        let class_file = ClassFile::new(name, Some(super_name.as_str()))
            .with_interface(self.config.names().djvm_exception.clone());
        self.define(class_file)
    }

    fn synthesize_array(&self, name: &str) -> Result<Arc<RuntimeClass>, SandboxError> {
        let array_type =
            FieldType::parse(name).map_err(|e| SandboxError::verification(e.to_string()))?;
        let component = array_type
            .component_type()
            .ok_or_else(|| SandboxError::ClassNotFound(name.to_string()))?;

        let mut ancestors = HashSet::from([name.to_string(), host::OBJECT.to_string()]);
        if !matches!(component, FieldType::Base(_)) {
            let component_class = self.load_class(&component.type_name())?;
            ancestors.extend(component_class.ancestors().iter().map(|a| array_of(a)));
        }
        let object = self.load_class(host::OBJECT)?;
        let class = Arc::new(RuntimeClass::array(
            name,
            &component.type_name(),
            ancestors,
            object,
        ));
        let mut classes = self.classes.write();
        Ok(classes.entry(name.to_string()).or_insert(class).clone())
    }
}

impl std::fmt::Debug for SandboxClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxClassLoader")
            .field("namespace", self.config.namespace())
            .field("loaded", &self.loaded_count())
            .finish_non_exhaustive()
    }
}
