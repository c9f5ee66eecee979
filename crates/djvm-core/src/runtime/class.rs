//! Loaded classes and compiled methods.

use super::object::Value;
use crate::errors::SandboxError;
use djvm_types::bytecode::{ClassFile, FieldDef, Instruction, Label, MethodDef, TryBlockKind, ACC_ABSTRACT, ACC_ENUM, ACC_INTERFACE, ACC_NATIVE, ACC_STATIC};
use djvm_types::MethodDescriptor;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

/// Which body `NEW` gives instances of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Instance,
    Throwable,
    List,
}

/// Progress of static initialisation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Pending,
    Running(ThreadId),
    Done,
    /// `<clinit>` failed; the class is unusable.
    Failed(String),
}

/// What [`RuntimeClass::claim_initialization`] asks the caller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitClaim {
    /// Run the initialiser, then call
    /// [`finish_initialization`](RuntimeClass::finish_initialization).
    Run,
    /// Nothing to do: initialised, or being initialised by this thread.
    Ready,
    /// An earlier initialisation failed with this reason.
    Failed(String),
}

/// One entry of a method's exception table, in instruction indices.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    /// `None` catches everything.
    pub catch_type: Option<String>,
}

#[derive(Debug)]
pub struct RuntimeMethod {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    pub code: Vec<Instruction>,
    pub labels: HashMap<Label, usize>,
    pub handlers: Vec<HandlerEntry>,
    pub arg_count: usize,
}

impl RuntimeMethod {
    pub fn compile(owner: &str, method: &MethodDef) -> Result<Self, SandboxError> {
        let descriptor = MethodDescriptor::parse(&method.descriptor)
            .map_err(|e| SandboxError::verification(format!("{}.{}: {}", owner, method.name, e)))?;

        let labels: HashMap<Label, usize> = method
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(pc, insn)| insn.as_label().map(|label| (label, pc)))
            .collect();
        let position = |label: Label| {
            labels.get(&label).copied().ok_or_else(|| {
                SandboxError::verification(format!(
                    "{}.{}{}: unknown label {}",
                    owner, method.name, method.descriptor, label
                ))
            })
        };
        let handlers = method
            .try_blocks()
            .map(|block| {
                Ok(HandlerEntry {
                    start: position(block.start)?,
                    end: position(block.end)?,
                    handler: position(block.handler)?,
                    catch_type: match &block.kind {
                        TryBlockKind::Catch { exception_type } => Some(exception_type.clone()),
                        TryBlockKind::Finally { .. } => None,
                    },
                })
            })
            .collect::<Result<Vec<_>, SandboxError>>()?;

        Ok(Self {
            owner: owner.to_string(),
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            access: method.access,
            code: method.instructions.clone(),
            labels,
            handlers,
            arg_count: descriptor.parameters.len(),
        })
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub fn is_native(&self) -> bool {
        self.access & ACC_NATIVE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access & ACC_ABSTRACT != 0
    }

    pub fn returns_value(&self) -> bool {
        !self.descriptor.ends_with(")V")
    }
}

pub struct RuntimeClass {
    name: String,
    super_class: Option<Arc<RuntimeClass>>,
    interfaces: Vec<String>,
    access: u16,
    kind: ObjectKind,
    /// This class, every superclass and every interface, by name.
    ancestors: HashSet<String>,
    fields: Vec<FieldDef>,
    methods: Vec<Arc<RuntimeMethod>>,
    statics: Mutex<HashMap<String, Value>>,
    init: Mutex<InitState>,
    init_changed: Condvar,
    /// Array classes: the component's type name.
    component: Option<String>,
}

impl RuntimeClass {
    /// Link a class file against its already-loaded superclass and interfaces.
    /// `kind` overrides the body kind inherited from the superclass.
    pub fn link(
        class: &ClassFile,
        super_class: Option<Arc<RuntimeClass>>,
        interfaces: &[Arc<RuntimeClass>],
        kind: Option<ObjectKind>,
    ) -> Result<Self, SandboxError> {
        let mut ancestors = HashSet::from([class.name.clone()]);
        if let Some(parent) = &super_class {
            ancestors.extend(parent.ancestors.iter().cloned());
        }
        for interface in interfaces {
            ancestors.extend(interface.ancestors.iter().cloned());
        }
        let methods = class
            .methods
            .iter()
            .map(|m| RuntimeMethod::compile(&class.name, m).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let statics = class
            .fields
            .iter()
            .filter(|f| f.is_static())
            .map(|f| (f.name.clone(), default_value(&f.descriptor)))
            .collect();
        let kind = kind
            .or_else(|| super_class.as_ref().map(|p| p.kind))
            .unwrap_or(ObjectKind::Instance);

        Ok(Self {
            name: class.name.clone(),
            super_class,
            interfaces: class.interfaces.clone(),
            access: class.access,
            kind,
            ancestors,
            fields: class.fields.clone(),
            methods,
            statics: Mutex::new(statics),
            init: Mutex::new(InitState::Pending),
            init_changed: Condvar::new(),
            component: None,
        })
    }

    /// An array class. `ancestors` must already include the array's own name.
    pub fn array(name: &str, component: &str, ancestors: HashSet<String>, super_class: Arc<RuntimeClass>) -> Self {
        Self {
            name: name.to_string(),
            super_class: Some(super_class),
            interfaces: Vec::new(),
            access: djvm_types::bytecode::ACC_PUBLIC | djvm_types::bytecode::ACC_FINAL,
            kind: ObjectKind::Instance,
            ancestors,
            fields: Vec::new(),
            methods: Vec::new(),
            statics: Mutex::new(HashMap::new()),
            init: Mutex::new(InitState::Done),
            init_changed: Condvar::new(),
            component: Some(component.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_class(&self) -> Option<&Arc<RuntimeClass>> {
        self.super_class.as_ref()
    }

    pub fn super_name(&self) -> Option<&str> {
        self.super_class.as_deref().map(RuntimeClass::name)
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn ancestors(&self) -> &HashSet<String> {
        &self.ancestors
    }

    pub fn is_subtype_of(&self, type_name: &str) -> bool {
        self.ancestors.contains(type_name)
    }

    pub fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access & (ACC_ABSTRACT | ACC_INTERFACE) != 0
    }

    pub fn is_enum(&self) -> bool {
        self.access & ACC_ENUM != 0
    }

    pub fn is_array(&self) -> bool {
        self.component.is_some()
    }

    pub fn component_type(&self) -> Option<&str> {
        self.component.as_deref()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn methods(&self) -> &[Arc<RuntimeMethod>] {
        &self.methods
    }

    /// Names of declared enum constants, in declaration order.
    pub fn enum_constant_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_enum_constant())
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn find_declared_method(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeMethod>> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Find a method on this class or its superclasses.
    pub fn resolve_method(&self, name: &str, descriptor: &str) -> Option<Arc<RuntimeMethod>> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(method) = class.find_declared_method(name, descriptor) {
                return Some(method.clone());
            }
            current = class.super_class.as_deref();
        }
        None
    }

    /// The first instance method called `name` taking `arity` arguments, on
    /// this class or its superclasses.
    pub fn resolve_by_arity(&self, name: &str, arity: usize) -> Option<Arc<RuntimeMethod>> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(method) = class
                .methods
                .iter()
                .find(|m| m.name == name && m.arg_count == arity && !m.is_static() && !m.is_abstract())
            {
                return Some(method.clone());
            }
            current = class.super_class.as_deref();
        }
        None
    }

    /// The class, this one or a superclass, declaring static field `name`.
    pub fn static_owner(self: &Arc<Self>, name: &str) -> Option<Arc<RuntimeClass>> {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if class.statics.lock().contains_key(name) {
                return Some(class);
            }
            current = class.super_class.clone();
        }
        None
    }

    pub fn get_static(&self, name: &str) -> Option<Value> {
        self.statics.lock().get(name).cloned()
    }

    pub fn set_static(&self, name: &str, value: Value) {
        self.statics.lock().insert(name.to_string(), value);
    }

    /// Default values of every instance field, inherited ones included.
    pub fn instance_field_defaults(&self) -> HashMap<String, Value> {
        let mut defaults = HashMap::new();
        let mut current = Some(self);
        while let Some(class) = current {
            for field in class.fields.iter().filter(|f| !f.is_static()) {
                defaults
                    .entry(field.name.clone())
                    .or_insert_with(|| default_value(&field.descriptor));
            }
            current = class.super_class.as_deref();
        }
        defaults
    }

    /// Claim initialisation. Exactly one thread gets [`InitClaim::Run`];
    /// other threads block until it finishes. The initialising thread
    /// re-entering gets [`InitClaim::Ready`].
    pub fn claim_initialization(&self) -> InitClaim {
        let current = std::thread::current().id();
        let mut state = self.init.lock();
        loop {
            match *state {
                InitState::Pending => {
                    *state = InitState::Running(current);
                    return InitClaim::Run;
                }
                InitState::Running(owner) if owner != current => {}
                InitState::Running(_) | InitState::Done => return InitClaim::Ready,
                InitState::Failed(ref reason) => return InitClaim::Failed(reason.clone()),
            }
            self.init_changed.wait(&mut state);
        }
    }

    /// Publish the result of the initialiser and wake waiting threads.
    pub fn finish_initialization(&self, failure: Option<String>) {
        *self.init.lock() = match failure {
            Some(reason) => InitState::Failed(reason),
            None => InitState::Done,
        };
        self.init_changed.notify_all();
    }

    pub fn is_initialized(&self) -> bool {
        *self.init.lock() == InitState::Done
    }
}

impl std::fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClass")
            .field("name", &self.name)
            .field("super", &self.super_name())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Zero value for a field descriptor.
pub fn default_value(descriptor: &str) -> Value {
    match descriptor.chars().next() {
        Some('J') => Value::Long(0),
        Some('F') => Value::Float(0.0),
        Some('D') => Value::Double(0.0),
        Some('L') | Some('[') => Value::Null,
        _ => Value::Int(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djvm_types::bytecode::{CodeBuilder, Opcode, ACC_PUBLIC};

    fn object_class() -> Arc<RuntimeClass> {
        let cf = ClassFile::new("java/lang/Object", None)
            .with_method(MethodDef::native(ACC_PUBLIC, "<init>", "()V"));
        Arc::new(RuntimeClass::link(&cf, None, &[], None).unwrap())
    }

    #[test]
    fn test_link_computes_ancestors_and_methods() {
        let object = object_class();
        let iface = Arc::new(
            RuntimeClass::link(
                &ClassFile::new("com/example/Shape", Some("java/lang/Object")).with_access(ACC_INTERFACE | ACC_ABSTRACT),
                Some(object.clone()),
                &[],
                None,
            )
            .unwrap(),
        );
        let cf = ClassFile::new("com/example/Circle", Some("java/lang/Object"))
            .with_interface("com/example/Shape")
            .with_field(FieldDef::new(ACC_STATIC, "COUNT", "I"))
            .with_field(FieldDef::new(ACC_PUBLIC, "radius", "J"));
        let circle = Arc::new(RuntimeClass::link(&cf, Some(object), &[iface], None).unwrap());

        assert!(circle.is_subtype_of("com/example/Circle"));
        assert!(circle.is_subtype_of("com/example/Shape"));
        assert!(circle.is_subtype_of("java/lang/Object"));
        assert!(circle.resolve_method("<init>", "()V").is_some());
        assert!(matches!(circle.get_static("COUNT"), Some(Value::Int(0))));
        assert!(matches!(
            circle.instance_field_defaults().get("radius"),
            Some(Value::Long(0))
        ));
        assert_eq!(circle.static_owner("COUNT").unwrap().name(), "com/example/Circle");
    }

    #[test]
    fn test_compile_resolves_handlers() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.try_finally(start, end, handler)
            .label(start)
            .insn(Opcode::Return)
            .label(end)
            .label(handler)
            .insn(Opcode::Athrow);
        let method = RuntimeMethod::compile("Foo", &MethodDef::new(ACC_PUBLIC, "run", "(IJ)V", code.build())).unwrap();
        assert_eq!(method.arg_count, 2);
        assert_eq!(method.handlers.len(), 1);
        let entry = &method.handlers[0];
        assert_eq!((entry.start, entry.end, entry.handler), (1, 3, 4));
        assert!(entry.catch_type.is_none());
        assert!(!method.returns_value());
    }

    #[test]
    fn test_compile_rejects_unknown_labels() {
        let mut code = CodeBuilder::new();
        code.try_finally(Label(0), Label(1), Label(2)).insn(Opcode::Return);
        let err = RuntimeMethod::compile("Foo", &MethodDef::new(ACC_PUBLIC, "run", "()V", code.build())).unwrap_err();
        assert!(matches!(err, SandboxError::Verification(_)));
    }

    #[test]
    fn test_initialization_is_claimed_once() {
        let object = object_class();
        assert_eq!(object.claim_initialization(), InitClaim::Run);
        // Re-entry from the initialising thread.
        assert_eq!(object.claim_initialization(), InitClaim::Ready);
        assert!(!object.is_initialized());
        object.finish_initialization(None);
        assert!(object.is_initialized());
        assert_eq!(object.claim_initialization(), InitClaim::Ready);
    }

    #[test]
    fn test_other_threads_wait_for_initialization() {
        let object = object_class();
        assert_eq!(object.claim_initialization(), InitClaim::Run);
        let waiter = {
            let object = object.clone();
            std::thread::spawn(move || {
                let claim = object.claim_initialization();
                (claim, object.is_initialized())
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        object.finish_initialization(None);
        assert_eq!(waiter.join().unwrap(), (InitClaim::Ready, true));
    }

    #[test]
    fn test_failed_initialization_is_remembered() {
        let object = object_class();
        assert_eq!(object.claim_initialization(), InitClaim::Run);
        object.finish_initialization(Some("boom".into()));
        assert!(!object.is_initialized());
        assert_eq!(object.claim_initialization(), InitClaim::Failed("boom".into()));
    }
}
