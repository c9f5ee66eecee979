//! Sandboxed execution.
//!
//! A [`SandboxRuntime`] owns one class namespace: its loader, the objects
//! created by the code it runs, the enum caches and the execution budget.
//! Runtimes share nothing but their configuration.

pub mod bridge;
pub mod class;
pub mod enums;
pub mod host;
mod interpreter;
pub mod library;
pub mod loader;
pub mod natives;
pub mod object;

pub use class::{InitClaim, ObjectKind, RuntimeClass, RuntimeMethod};
pub use enums::{DeclaredConstants, EnumDirectory, EnumDirectoryCache, EnumValuesAccessor};
pub use host::HostValue;
pub use loader::{ClassSource, InMemoryClassSource, SandboxClassLoader};
pub use natives::{MethodKey, NativeFn, NativeRegistry};
pub use object::{Object, ObjectBody, ObjectRef, Primitive, ThrowableState, Value};

use crate::config::{AnalysisConfiguration, BridgeNames, SandboxConfiguration};
use crate::errors::SandboxError;
use crate::well_known::host as host_classes;
use djvm_types::bytecode::CLASS_INITIALISER_NAME;
use djvm_types::Namespace;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct SandboxRuntime {
    config: SandboxConfiguration,
    loader: SandboxClassLoader,
    natives: NativeRegistry,
    enums: EnumDirectoryCache,
    instructions: AtomicU64,
    depth: AtomicUsize,
}

/// Decrements the call depth when an invocation returns.
struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SandboxRuntime {
    pub fn new(config: SandboxConfiguration, source: Arc<dyn ClassSource>) -> Result<Self, SandboxError> {
        Self::with_natives(config, source, &NativeRegistry::new())
    }

    /// A runtime whose native registry is the standard one extended with
    /// `extra`.
    pub fn with_natives(
        config: SandboxConfiguration,
        source: Arc<dyn ClassSource>,
        extra: &NativeRegistry,
    ) -> Result<Self, SandboxError> {
        let mut natives = NativeRegistry::standard(&config.analysis);
        natives.extend(extra);
        let enums = EnumDirectoryCache::new(config.cache_factory.as_ref())?;
        let loader = SandboxClassLoader::new(config.analysis.clone(), source);
        Ok(Self {
            config,
            loader,
            natives,
            enums,
            instructions: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &SandboxConfiguration {
        &self.config
    }

    pub fn analysis(&self) -> &AnalysisConfiguration {
        &self.config.analysis
    }

    pub fn namespace(&self) -> &Namespace {
        self.config.analysis.namespace()
    }

    pub fn names(&self) -> &BridgeNames {
        self.config.analysis.names()
    }

    pub fn loader(&self) -> &SandboxClassLoader {
        &self.loader
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn enum_caches(&self) -> &EnumDirectoryCache {
        &self.enums
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions.load(Ordering::SeqCst)
    }

    pub fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>, SandboxError> {
        self.loader.load_class(name)
    }

    /// Run static initialisation for `class` and its superclasses, once.
    /// Enum constants exist before `<clinit>` runs. Other threads wait until
    /// initialisation completes; after a failed `<clinit>` every use of the
    /// class throws `NoClassDefFoundError`.
    pub fn ensure_initialized(&self, class: &Arc<RuntimeClass>) -> Result<(), SandboxError> {
        if class.is_initialized() {
            return Ok(());
        }
        if let Some(parent) = class.super_class() {
            self.ensure_initialized(parent)?;
        }
        match class.claim_initialization() {
            InitClaim::Run => {}
            InitClaim::Ready => return Ok(()),
            InitClaim::Failed(reason) => {
                return Err(self.throw_host(
                    host_classes::NO_CLASS_DEF_FOUND,
                    format!("Could not initialize class {} ({})", class.name(), reason),
                ))
            }
        }
        let result = self.run_initialiser(class);
        if let Err(err) = &result {
            debug!(class = %class.name(), error = %err, "class initialisation failed");
        }
        class.finish_initialization(result.as_ref().err().map(|err| err.to_string()));
        result
    }

    fn run_initialiser(&self, class: &Arc<RuntimeClass>) -> Result<(), SandboxError> {
        if class.is_enum() {
            for (ordinal, name) in class.enum_constant_names().into_iter().enumerate() {
                let constant = Object::new(
                    class.clone(),
                    ObjectBody::Enum {
                        name: name.to_string(),
                        ordinal,
                    },
                );
                class.set_static(name, Value::Ref(constant));
            }
        }
        if let Some(initialiser) = class.find_declared_method(CLASS_INITIALISER_NAME, "()V").cloned() {
            trace!(class = %class.name(), "running class initialiser");
            self.invoke_method(&initialiser, Vec::new())?;
        }
        Ok(())
    }

    /// A fresh instance of `class`, with the body its kind requires.
    pub fn new_object(&self, class: &Arc<RuntimeClass>) -> Result<ObjectRef, SandboxError> {
        if class.is_abstract() || class.is_array() {
            return Err(SandboxError::verification(format!(
                "cannot instantiate {}",
                class.name()
            )));
        }
        self.ensure_initialized(class)?;
        let body = match class.kind() {
            ObjectKind::Instance => ObjectBody::Instance,
            ObjectKind::Throwable => ObjectBody::Throwable(Mutex::new(ThrowableState::default())),
            ObjectKind::List => ObjectBody::List(Mutex::new(Vec::new())),
        };
        Ok(Object::new(class.clone(), body))
    }

    pub fn new_string(&self, class_name: &str, value: &str) -> Result<ObjectRef, SandboxError> {
        let class = self.load_class(class_name)?;
        Ok(Object::new(class, ObjectBody::Str(value.to_string())))
    }

    pub fn host_string(&self, value: &str) -> Result<ObjectRef, SandboxError> {
        self.new_string(host_classes::STRING, value)
    }

    pub fn sandbox_string(&self, value: &str) -> Result<ObjectRef, SandboxError> {
        let class = self.names().string.clone();
        self.new_string(&class, value)
    }

    pub fn new_boxed(&self, class_name: &str, value: Primitive) -> Result<ObjectRef, SandboxError> {
        let class = self.load_class(class_name)?;
        Ok(Object::new(class, ObjectBody::Boxed(value)))
    }

    /// An array of class `array_class` (`[I`, `[Ljava/lang/String;`, ...).
    pub fn new_array(&self, array_class: &str, elements: Vec<Value>) -> Result<ObjectRef, SandboxError> {
        let class = self.load_class(array_class)?;
        if !class.is_array() {
            return Err(SandboxError::verification(format!("{} is not an array class", array_class)));
        }
        Ok(Object::new(class, ObjectBody::Array(Mutex::new(elements))))
    }

    pub fn new_throwable(
        &self,
        class_name: &str,
        message: Value,
        cause: Option<ObjectRef>,
        carried: Option<ObjectRef>,
    ) -> Result<ObjectRef, SandboxError> {
        let class = self.load_class(class_name)?;
        if class.kind() != ObjectKind::Throwable {
            return Err(SandboxError::verification(format!("{} is not a throwable", class_name)));
        }
        self.ensure_initialized(&class)?;
        let state = ThrowableState {
            message,
            cause,
            carried,
        };
        Ok(Object::new(class, ObjectBody::Throwable(Mutex::new(state))))
    }

    pub fn new_host_throwable(&self, class_name: &str, message: Option<&str>) -> Result<ObjectRef, SandboxError> {
        let message = match message {
            Some(text) => Value::Ref(self.host_string(text)?),
            None => Value::Null,
        };
        self.new_throwable(class_name, message, None, None)
    }

    /// A host exception ready to propagate, or the error that prevented
    /// creating it.
    pub fn throw_host(&self, class_name: &str, message: impl Into<String>) -> SandboxError {
        let message = message.into();
        match self.new_host_throwable(class_name, Some(&message)) {
            Ok(throwable) => SandboxError::Thrown(throwable),
            Err(err) => err,
        }
    }

    pub fn invoke_static(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, SandboxError> {
        let class = self.load_class(owner)?;
        self.ensure_initialized(&class)?;
        match class.resolve_method(name, descriptor) {
            Some(method) => self.invoke_method(&method, args),
            // Enums answer `values()` without declaring it.
            None if enums::is_values_call(&class, name, descriptor) => {
                Ok(Some(Value::Ref(self.enum_values_array(&class)?)))
            }
            None => Err(no_such_method(owner, name, descriptor)),
        }
    }

    /// Invoke the implementation declared on `owner` or inherited by it.
    /// `args[0]` is the receiver.
    pub fn invoke_special(
        &self,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, SandboxError> {
        let class = self.load_class(owner)?;
        let method = class
            .resolve_method(name, descriptor)
            .ok_or_else(|| no_such_method(owner, name, descriptor))?;
        self.invoke_method(&method, args)
    }

    /// Dispatch on the receiver's class. `args` excludes the receiver.
    pub fn invoke_virtual(
        &self,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, SandboxError> {
        let method = receiver
            .class()
            .resolve_method(name, descriptor)
            .filter(|m| !m.is_abstract())
            .ok_or_else(|| no_such_method(receiver.class_name(), name, descriptor))?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Ref(receiver.clone()));
        full.extend(args);
        self.invoke_method(&method, full)
    }

    /// Run `method` with its complete argument list, receiver first for
    /// instance methods.
    pub fn invoke_method(&self, method: &Arc<RuntimeMethod>, args: Vec<Value>) -> Result<Option<Value>, SandboxError> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = DepthGuard(&self.depth);
        let max_depth = self.config.limits.max_call_depth;
        if depth > max_depth {
            return Err(SandboxError::ThresholdExceeded(format!(
                "call depth exceeded {}",
                max_depth
            )));
        }

        if method.is_native() {
            let native = self
                .natives
                .get(&method.owner, &method.name, &method.descriptor)
                .cloned()
                .ok_or_else(|| no_such_method(&method.owner, &method.name, &method.descriptor))?;
            return native(self, &args);
        }
        if method.is_abstract() {
            return Err(SandboxError::verification(format!(
                "abstract method {}.{}{}",
                method.owner, method.name, method.descriptor
            )));
        }
        interpreter::execute(self, method, args)
    }

    /// Count one executed instruction against the budget.
    pub(crate) fn charge_instruction(&self) -> Result<(), SandboxError> {
        let executed = self.instructions.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.config.limits.max_instructions;
        if executed > max {
            return Err(SandboxError::ThresholdExceeded(format!(
                "instruction budget of {} exhausted",
                max
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SandboxRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRuntime")
            .field("loader", &self.loader)
            .field("instructions", &self.instructions_executed())
            .finish_non_exhaustive()
    }
}

fn no_such_method(owner: &str, name: &str, descriptor: &str) -> SandboxError {
    SandboxError::NoSuchMethod {
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionLimits;
    use djvm_types::bytecode::{ClassFile, CodeBuilder, FieldDef, MethodDef, Opcode, ACC_ENUM, ACC_PUBLIC, ACC_STATIC};

    fn runtime(classes: Vec<ClassFile>) -> SandboxRuntime {
        SandboxRuntime::new(
            SandboxConfiguration::default(),
            Arc::new(InMemoryClassSource::from_classes(classes)),
        )
        .unwrap()
    }

    #[test]
    fn test_host_exception_objects() {
        let rt = runtime(Vec::new());
        let npe = rt.new_host_throwable("java/lang/NullPointerException", Some("boom")).unwrap();
        assert!(npe.is_instance_of("java/lang/RuntimeException"));
        assert_eq!(npe.throwable_message().as_deref(), Some("boom"));
        let err = rt.throw_host("java/lang/ArithmeticException", "/ by zero");
        assert_eq!(err.to_string(), "Thrown: java/lang/ArithmeticException: / by zero");
        assert!(matches!(
            rt.new_host_throwable("java/lang/String", None),
            Err(SandboxError::Verification(_))
        ));
    }

    #[test]
    fn test_enum_constants_exist_before_initialiser() {
        let mut code = CodeBuilder::new();
        code.field(Opcode::Getstatic, "com/example/Color", "RED", "Lcom/example/Color;")
            .field(Opcode::Putstatic, "com/example/Color", "DEFAULT", "Lcom/example/Color;")
            .insn(Opcode::Return);
        let color = ClassFile::new("com/example/Color", Some("java/lang/Enum"))
            .with_access(ACC_PUBLIC | ACC_ENUM)
            .with_field(FieldDef::new(ACC_PUBLIC | ACC_STATIC | ACC_ENUM, "RED", "Lcom/example/Color;"))
            .with_field(FieldDef::new(ACC_PUBLIC | ACC_STATIC | ACC_ENUM, "GREEN", "Lcom/example/Color;"))
            .with_field(FieldDef::new(ACC_STATIC, "DEFAULT", "Lcom/example/Color;"))
            .with_method(MethodDef::new(ACC_STATIC, "<clinit>", "()V", code.build()));
        let rt = runtime(vec![color]);
        let class = rt.load_class("com/example/Color").unwrap();
        rt.ensure_initialized(&class).unwrap();
        let red = class.get_static("RED").unwrap();
        assert!(red.same(&class.get_static("DEFAULT").unwrap()));
        match class.get_static("GREEN") {
            Some(Value::Ref(green)) => {
                assert!(matches!(green.body(), ObjectBody::Enum { ordinal: 1, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_first_access_to_enum_constants() {
        let mut big = ClassFile::new("com/example/Big", Some("java/lang/Enum")).with_access(ACC_PUBLIC | ACC_ENUM);
        for i in 0..2000 {
            big = big.with_field(FieldDef::new(
                ACC_PUBLIC | ACC_STATIC | ACC_ENUM,
                format!("C{}", i).as_str(),
                "Lcom/example/Big;",
            ));
        }
        for _ in 0..10 {
            let rt = Arc::new(runtime(vec![big.clone()]));
            let barrier = Arc::new(std::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let rt = rt.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let class = rt.load_class("com/example/Big").unwrap();
                        barrier.wait();
                        rt.enum_constants(&class)
                    })
                })
                .collect();
            let results: Vec<_> = handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap().unwrap())
                .collect();
            assert_eq!(results[0].len(), 2000);
            assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        }
    }

    #[test]
    fn test_failed_initialiser_leaves_class_unusable() {
        let mut clinit = CodeBuilder::new();
        clinit
            .insn(Opcode::Iconst1)
            .insn(Opcode::Iconst0)
            .insn(Opcode::Idiv)
            .field(Opcode::Putstatic, "com/example/Broken", "VALUE", "I")
            .insn(Opcode::Return);
        let mut get = CodeBuilder::new();
        get.field(Opcode::Getstatic, "com/example/Broken", "VALUE", "I")
            .insn(Opcode::Ireturn);
        let broken = ClassFile::new("com/example/Broken", Some("java/lang/Object"))
            .with_field(FieldDef::new(ACC_STATIC, "VALUE", "I"))
            .with_method(MethodDef::new(ACC_STATIC, "<clinit>", "()V", clinit.build()))
            .with_method(MethodDef::new(ACC_PUBLIC | ACC_STATIC, "get", "()I", get.build()));
        let rt = runtime(vec![broken]);

        let first = rt.invoke_static("com/example/Broken", "get", "()I", Vec::new()).unwrap_err();
        assert_eq!(first.thrown().unwrap().class_name(), "java/lang/ArithmeticException");

        let class = rt.load_class("com/example/Broken").unwrap();
        assert!(!class.is_initialized());
        for _ in 0..2 {
            let err = rt.invoke_static("com/example/Broken", "get", "()I", Vec::new()).unwrap_err();
            let thrown = err.thrown().unwrap();
            assert_eq!(thrown.class_name(), "java/lang/NoClassDefFoundError");
            assert!(thrown
                .throwable_message()
                .unwrap()
                .starts_with("Could not initialize class com/example/Broken"));
        }
    }

    #[test]
    fn test_call_depth_is_bounded() {
        let mut code = CodeBuilder::new();
        code.invoke(Opcode::Invokestatic, "com/example/Loop", "spin", "()V")
            .insn(Opcode::Return);
        let looping = ClassFile::new("com/example/Loop", Some("java/lang/Object"))
            .with_method(MethodDef::new(ACC_PUBLIC | ACC_STATIC, "spin", "()V", code.build()));
        let config = SandboxConfiguration::default().with_limits(ExecutionLimits {
            max_instructions: 1_000_000,
            max_call_depth: 16,
        });
        let rt = SandboxRuntime::new(config, Arc::new(InMemoryClassSource::from_classes(vec![looping]))).unwrap();
        let err = rt
            .invoke_static("com/example/Loop", "spin", "()V", Vec::new())
            .unwrap_err();
        assert!(matches!(err, SandboxError::ThresholdExceeded(_)));
        assert!(!err.is_catchable());
    }
}
