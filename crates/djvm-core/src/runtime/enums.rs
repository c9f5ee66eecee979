//! Enum constant arrays and name directories.
//!
//! Both are memoised per class in the runtime's named caches, so every caller
//! of [`SandboxRuntime::enum_constants`] for a class receives the same
//! `Arc`. Constants are obtained through an [`EnumValuesAccessor`]; classes
//! without a registered accessor use [`DeclaredConstants`].

use super::class::RuntimeClass;
use super::object::{ObjectBody, ObjectRef, Value};
use super::SandboxRuntime;
use crate::cache::{NamedCache, NamedCacheFactory};
use crate::errors::{CacheError, SandboxError};
use crate::well_known::{caches, host};
use djvm_types::descriptor::array_of;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name -> constant for one enum class.
pub type EnumDirectory = Arc<HashMap<String, ObjectRef>>;

/// Produces the constants of an enum class, in ordinal order.
pub trait EnumValuesAccessor: Send + Sync {
    fn values(&self, runtime: &SandboxRuntime, class: &Arc<RuntimeClass>) -> Result<Vec<ObjectRef>, SandboxError>;
}

/// The constants the class declares, read from its static fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredConstants;

impl EnumValuesAccessor for DeclaredConstants {
    fn values(&self, _runtime: &SandboxRuntime, class: &Arc<RuntimeClass>) -> Result<Vec<ObjectRef>, SandboxError> {
        class
            .enum_constant_names()
            .into_iter()
            .map(|name| match class.get_static(name) {
                Some(Value::Ref(constant)) => Ok(constant),
                _ => Err(SandboxError::verification(format!(
                    "enum constant {}.{} is not initialised",
                    class.name(),
                    name
                ))),
            })
            .collect()
    }
}

pub struct EnumDirectoryCache {
    constants: NamedCache<String, Arc<[ObjectRef]>>,
    directories: NamedCache<String, EnumDirectory>,
    accessors: RwLock<HashMap<String, Arc<dyn EnumValuesAccessor>>>,
}

impl EnumDirectoryCache {
    pub fn new(factory: &dyn NamedCacheFactory) -> Result<Self, CacheError> {
        Ok(Self {
            constants: NamedCache::from_factory(factory, caches::ENUM_CONSTANTS)?,
            directories: NamedCache::from_factory(factory, caches::ENUM_DIRECTORIES)?,
            accessors: RwLock::new(HashMap::new()),
        })
    }

    /// Use `accessor` for the enum class `class_name`. Must be registered
    /// before the class's constants are first requested.
    pub fn register_accessor(&self, class_name: &str, accessor: Arc<dyn EnumValuesAccessor>) {
        self.accessors.write().insert(class_name.to_string(), accessor);
    }

    pub fn constants_cache(&self) -> &NamedCache<String, Arc<[ObjectRef]>> {
        &self.constants
    }

    pub fn directories_cache(&self) -> &NamedCache<String, EnumDirectory> {
        &self.directories
    }

    fn accessor_for(&self, class_name: &str) -> Arc<dyn EnumValuesAccessor> {
        self.accessors
            .read()
            .get(class_name)
            .cloned()
            .unwrap_or_else(|| Arc::new(DeclaredConstants))
    }
}

impl std::fmt::Debug for EnumDirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumDirectoryCache")
            .field("constants", &self.constants)
            .field("directories", &self.directories)
            .finish_non_exhaustive()
    }
}

/// Whether `name descriptor` is the implicit `values()` of enum `class`.
pub(crate) fn is_values_call(class: &RuntimeClass, name: &str, descriptor: &str) -> bool {
    class.is_enum() && name == "values" && descriptor == format!("()[L{};", class.name())
}

impl SandboxRuntime {
    /// The constants of `class` in ordinal order, `None` when it is not an
    /// enum.
    pub fn enum_constants(&self, class: &Arc<RuntimeClass>) -> Result<Option<Arc<[ObjectRef]>>, SandboxError> {
        if !class.is_enum() {
            return Ok(None);
        }
        // Initialise outside the cache entry: `<clinit>` may itself look the
        // constants up.
        self.ensure_initialized(class)?;
        let constants = self
            .enums
            .constants
            .get_or_try_insert_with(class.name().to_string(), || {
                debug!(class = %class.name(), "loading enum constants");
                let accessor = self.enums.accessor_for(class.name());
                accessor.values(self, class).map(Arc::from)
            })?;
        Ok(Some(constants))
    }

    /// Name -> constant for enum `class`. Throws `IllegalArgumentException`
    /// for other classes.
    pub fn enum_constant_directory(&self, class: &Arc<RuntimeClass>) -> Result<EnumDirectory, SandboxError> {
        let constants = self.enum_constants(class)?.ok_or_else(|| {
            self.throw_host(
                host::ILLEGAL_ARGUMENT,
                format!("{} is not an enum type", class.name()),
            )
        })?;
        self.enums
            .directories
            .get_or_try_insert_with(class.name().to_string(), || {
                let mut directory = HashMap::with_capacity(constants.len());
                for constant in constants.iter() {
                    match constant.body() {
                        ObjectBody::Enum { name, .. } => {
                            directory.insert(name.clone(), constant.clone());
                        }
                        _ => {
                            return Err(SandboxError::verification(format!(
                                "{} is not an enum constant",
                                constant.class_name()
                            )))
                        }
                    }
                }
                Ok(Arc::new(directory))
            })
    }

    /// A fresh array holding the constants of `class`, as `values()` returns.
    pub fn enum_values_array(&self, class: &Arc<RuntimeClass>) -> Result<ObjectRef, SandboxError> {
        let constants = self.enum_constants(class)?.unwrap_or_else(|| Arc::from(Vec::new()));
        let elements = constants.iter().cloned().map(Value::Ref).collect();
        self.new_array(&array_of(class.name()), elements)
    }

    pub fn register_enum_accessor(&self, class_name: &str, accessor: Arc<dyn EnumValuesAccessor>) {
        self.enums.register_accessor(class_name, accessor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfiguration;
    use crate::runtime::loader::InMemoryClassSource;
    use djvm_types::bytecode::{ClassFile, FieldDef, ACC_ENUM, ACC_PUBLIC, ACC_STATIC};

    fn color() -> ClassFile {
        let constant = |name: &str| FieldDef::new(ACC_PUBLIC | ACC_STATIC | ACC_ENUM, name, "Lcom/example/Color;");
        ClassFile::new("com/example/Color", Some("java/lang/Enum"))
            .with_access(ACC_PUBLIC | ACC_ENUM)
            .with_field(constant("RED"))
            .with_field(constant("GREEN"))
            .with_field(constant("BLUE"))
    }

    fn runtime() -> SandboxRuntime {
        SandboxRuntime::new(
            SandboxConfiguration::default(),
            Arc::new(InMemoryClassSource::from_classes(vec![
                color(),
                ClassFile::new("com/example/Plain", Some("java/lang/Object")),
            ])),
        )
        .unwrap()
    }

    #[test]
    fn test_constants_are_memoised() {
        let rt = runtime();
        let class = rt.load_class("com/example/Color").unwrap();
        let first = rt.enum_constants(&class).unwrap().unwrap();
        let second = rt.enum_constants(&class).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let names: Vec<_> = first
            .iter()
            .map(|c| match c.body() {
                ObjectBody::Enum { name, .. } => name.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(names, ["RED", "GREEN", "BLUE"]);

        let directory = rt.enum_constant_directory(&class).unwrap();
        assert!(Arc::ptr_eq(&directory["GREEN"], &first[1]));
        assert!(Arc::ptr_eq(&directory, &rt.enum_constant_directory(&class).unwrap()));
    }

    #[test]
    fn test_non_enum_classes() {
        let rt = runtime();
        let plain = rt.load_class("com/example/Plain").unwrap();
        assert!(rt.enum_constants(&plain).unwrap().is_none());
        let err = rt.enum_constant_directory(&plain).unwrap_err();
        let thrown = err.thrown().unwrap();
        assert_eq!(thrown.class_name(), "java/lang/IllegalArgumentException");
    }

    struct Reversed;

    impl EnumValuesAccessor for Reversed {
        fn values(&self, runtime: &SandboxRuntime, class: &Arc<RuntimeClass>) -> Result<Vec<ObjectRef>, SandboxError> {
            let mut values = DeclaredConstants.values(runtime, class)?;
            values.reverse();
            Ok(values)
        }
    }

    #[test]
    fn test_registered_accessor_is_used() {
        let rt = runtime();
        rt.register_enum_accessor("com/example/Color", Arc::new(Reversed));
        let class = rt.load_class("com/example/Color").unwrap();
        let constants = rt.enum_constants(&class).unwrap().unwrap();
        assert!(matches!(constants[0].body(), ObjectBody::Enum { name, .. } if name == "BLUE"));
        let values = rt.enum_values_array(&class).unwrap();
        assert_eq!(values.class_name(), "[Lcom/example/Color;");
        assert_eq!(values.elements().unwrap().len(), 3);
    }
}
