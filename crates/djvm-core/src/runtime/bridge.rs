//! Crossing the sandbox boundary.
//!
//! Values move between the host world and the sandbox world by conversion,
//! never by sharing: strings, boxed primitives, enum constants and arrays
//! are rebuilt in the other world, and throwables follow the conversion
//! protocol of [`SandboxRuntime::to_djvm`] and [`SandboxRuntime::from_djvm`].

use super::class::RuntimeClass;
use super::object::{ObjectBody, ObjectRef, Value};
use super::SandboxRuntime;
use crate::errors::SandboxError;
use crate::exceptions::shadow_name_of;
use crate::resolver::ClassResolver;
use crate::well_known::{host, BOXED_CLASSES};
use djvm_types::bytecode::CONSTRUCTOR_NAME;
use djvm_types::names::to_internal_name;
use std::sync::Arc;
use tracing::{trace, warn};

impl SandboxRuntime {
    /// Convert a host value to its sandbox counterpart.
    pub fn sandbox(&self, value: &Value) -> Result<Value, SandboxError> {
        let Value::Ref(obj) = value else {
            return Ok(value.clone());
        };
        let namespace = self.namespace();
        if namespace.is_sandboxed(obj.class_name()) {
            return Ok(value.clone());
        }
        let converted = match obj.body() {
            ObjectBody::Str(text) => self.sandbox_string(text)?,
            ObjectBody::Boxed(primitive) if BOXED_CLASSES.iter().any(|c| *c == obj.class_name()) => {
                self.new_boxed(&namespace.to_sandbox_internal(obj.class_name()), *primitive)?
            }
            ObjectBody::Enum { ordinal, .. } => {
                let class = self.load_class(&namespace.to_sandbox_internal(obj.class_name()))?;
                self.constant_with_ordinal(&class, *ordinal)?
            }
            ObjectBody::Array(_) => match self.convert_array(obj, true)? {
                Some(array) => array,
                None => obj.clone(),
            },
            ObjectBody::Throwable(_) => self.to_djvm(obj)?,
            _ => obj.clone(),
        };
        Ok(Value::Ref(converted))
    }

    /// Convert a sandbox value back to the host world. Sandbox throwables
    /// go through [`from_djvm`](Self::from_djvm).
    pub fn unsandbox(&self, value: &Value) -> Result<Value, SandboxError> {
        let Value::Ref(obj) = value else {
            return Ok(value.clone());
        };
        let namespace = self.namespace();
        let converted = match obj.body() {
            ObjectBody::Array(_) => match self.convert_array(obj, false)? {
                Some(array) => array,
                None => obj.clone(),
            },
            _ if !namespace.is_sandboxed(obj.class_name()) => obj.clone(),
            ObjectBody::Str(text) => self.host_string(text)?,
            ObjectBody::Boxed(primitive) => {
                self.new_boxed(&namespace.from_sandbox_internal(obj.class_name()), *primitive)?
            }
            ObjectBody::Enum { ordinal, .. } => {
                let class = self.load_class(&namespace.from_sandbox_internal(obj.class_name()))?;
                self.constant_with_ordinal(&class, *ordinal)?
            }
            ObjectBody::Throwable(_) => self.from_djvm(obj)?,
            _ => obj.clone(),
        };
        Ok(Value::Ref(converted))
    }

    fn constant_with_ordinal(&self, class: &Arc<RuntimeClass>, ordinal: usize) -> Result<ObjectRef, SandboxError> {
        let constants = self.enum_constants(class)?.ok_or_else(|| {
            SandboxError::RuleViolation(format!("{} is not an enum", class.name()))
        })?;
        constants.get(ordinal).cloned().ok_or_else(|| {
            SandboxError::RuleViolation(format!("{} has no constant with ordinal {}", class.name(), ordinal))
        })
    }

    /// Rebuild an array in the other world, element by element. `None` when
    /// the array class is the same in both worlds.
    fn convert_array(&self, array: &ObjectRef, into_sandbox: bool) -> Result<Option<ObjectRef>, SandboxError> {
        let resolver = ClassResolver::new(self.config().analysis.clone());
        let source_class = array.class_name();
        let target_class = if into_sandbox {
            resolver.resolve_type(source_class)
        } else {
            resolver.reverse_type(source_class)
        }
        .map_err(|e| SandboxError::verification(e.to_string()))?;
        if target_class == source_class {
            return Ok(None);
        }
        let elements: Vec<Value> = array
            .elements()
            .map(|items| items.clone())
            .unwrap_or_default();
        let converted = elements
            .iter()
            .map(|element| {
                if into_sandbox {
                    self.sandbox(element)
                } else {
                    self.unsandbox(element)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(self.new_array(&target_class, converted)?))
    }

    /// Convert a host throwable caught by sandboxed code into a sandbox
    /// throwable.
    pub fn to_djvm(&self, throwable: &ObjectRef) -> Result<ObjectRef, SandboxError> {
        if throwable.is_instance_of(host::THREAD_DEATH) {
            return self.wrap_throwable(throwable);
        }
        let (message, cause, carried) = {
            let state = throwable.throwable().ok_or_else(|| {
                SandboxError::verification(format!("{} is not a throwable", throwable.class_name()))
            })?;
            (state.message.clone(), state.cause.clone(), state.carried.clone())
        };
        if let Some(sandboxed) = carried {
            return Ok(sandboxed);
        }

        let sandbox_name = self.namespace().to_sandbox_internal(throwable.class_name());
        let class = match self.load_class(&sandbox_name) {
            Ok(class) => class,
            Err(SandboxError::ClassNotFound(missing)) => {
                trace!(class = %missing, "no sandbox class for host throwable");
                let not_found = self.new_host_throwable(host::CLASS_NOT_FOUND, Some(&missing))?;
                return self.wrap_throwable(&not_found);
            }
            Err(err) => return Err(err),
        };

        let converted = self.new_object(&class)?;
        let message_constructor = self.names().message_constructor.clone();
        match (class.find_declared_method(CONSTRUCTOR_NAME, &message_constructor), message_text(&message)?) {
            (Some(_), Some(text)) => {
                let args = vec![Value::Ref(converted.clone()), Value::Ref(self.sandbox_string(&text)?)];
                self.invoke_special(class.name(), CONSTRUCTOR_NAME, &message_constructor, args)?;
            }
            _ => {
                let args = vec![Value::Ref(converted.clone())];
                self.invoke_special(class.name(), CONSTRUCTOR_NAME, "()V", args)?;
            }
        }
        if let Some(cause) = cause.filter(|c| !Arc::ptr_eq(c, throwable)) {
            let cause = self.to_djvm(&cause)?;
            if let Some(mut state) = converted.throwable() {
                state.cause = Some(cause);
            }
        }
        Ok(converted)
    }

    /// Convert a sandbox throwable into the host throwable that is actually
    /// thrown. Any failure is a rule violation, never a catchable exception.
    pub fn from_djvm(&self, throwable: &ObjectRef) -> Result<ObjectRef, SandboxError> {
        self.convert_from_djvm(throwable).map_err(|err| match err {
            SandboxError::RuleViolation(_) | SandboxError::ThresholdExceeded(_) => err,
            other => SandboxError::RuleViolation(format!(
                "cannot convert {} to a host throwable: {}",
                throwable.class_name(),
                other
            )),
        })
    }

    fn convert_from_djvm(&self, throwable: &ObjectRef) -> Result<ObjectRef, SandboxError> {
        let names = self.names();
        let (message, cause, carried) = {
            let state = throwable.throwable().ok_or_else(|| {
                SandboxError::verification(format!("{} is not a throwable", throwable.class_name()))
            })?;
            (state.message.clone(), state.cause.clone(), state.carried.clone())
        };
        if throwable.class_name() == names.throwable_wrapper {
            return carried.ok_or_else(|| SandboxError::verification("empty throwable wrapper"));
        }
        if !throwable.is_instance_of(&names.throwable) {
            // Already a host throwable.
            return Ok(throwable.clone());
        }

        let text = message_text(&message)?;
        let converted = if self.analysis().is_jvm_exception(throwable.class_name()) {
            let host_name = self.namespace().from_sandbox_internal(throwable.class_name());
            self.new_host_throwable(&host_name, text.as_deref())?
        } else {
            let host_message = match &text {
                Some(text) => Value::Ref(self.host_string(text)?),
                None => Value::Null,
            };
            self.new_throwable(
                &shadow_name_of(throwable.class_name()),
                host_message,
                None,
                Some(throwable.clone()),
            )?
        };
        if let Some(cause) = cause.filter(|c| !Arc::ptr_eq(c, throwable)) {
            let cause = self.convert_from_djvm(&cause)?;
            if let Some(mut state) = converted.throwable() {
                state.cause = Some(cause);
            }
        }
        Ok(converted)
    }

    fn wrap_throwable(&self, throwable: &ObjectRef) -> Result<ObjectRef, SandboxError> {
        let message = match throwable.throwable_message() {
            Some(text) => Value::Ref(self.sandbox_string(&text)?),
            None => Value::Null,
        };
        let wrapper = self.names().throwable_wrapper.clone();
        self.new_throwable(&wrapper, message, None, Some(throwable.clone()))
    }

    /// Load a class by binary name on behalf of sandboxed code. Denylisted
    /// names are refused; every other name is moved into the namespace.
    pub fn class_for_name(&self, binary_name: &str) -> Result<Arc<RuntimeClass>, SandboxError> {
        if self.analysis().is_banned(binary_name) {
            warn!(class = %binary_name, "refusing to load banned class");
            return Err(SandboxError::ClassNotFound(binary_name.to_string()));
        }
        let internal = format!(
            "{}{}",
            self.namespace().internal_prefix(),
            to_internal_name(binary_name)
        );
        self.load_class(&internal)
    }
}

fn message_text(message: &Value) -> Result<Option<String>, SandboxError> {
    Ok(message
        .as_reference()?
        .and_then(|m| m.as_str().map(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfiguration, SandboxConfiguration};
    use crate::runtime::loader::InMemoryClassSource;
    use crate::runtime::object::Primitive;
    use djvm_types::bytecode::{ClassFile, CodeBuilder, FieldDef, MethodDef, Opcode, ACC_ENUM, ACC_PUBLIC, ACC_STATIC};

    fn classes() -> Vec<ClassFile> {
        let mut init = CodeBuilder::new();
        init.var(Opcode::Aload, 0)
            .var(Opcode::Aload, 1)
            .invoke(Opcode::Invokespecial, "java/lang/Exception", "<init>", "(Ljava/lang/String;)V")
            .insn(Opcode::Return);
        let constant = |name: &str| FieldDef::new(ACC_PUBLIC | ACC_STATIC | ACC_ENUM, name, "Lcom/example/Color;");
        vec![
            ClassFile::new("com/example/MyBaseException", Some("java/lang/Exception")).with_method(
                MethodDef::new(ACC_PUBLIC, "<init>", "(Ljava/lang/String;)V", init.build()),
            ),
            ClassFile::new("com/example/Color", Some("java/lang/Enum"))
                .with_access(ACC_PUBLIC | ACC_ENUM)
                .with_field(constant("RED"))
                .with_field(constant("GREEN")),
        ]
    }

    fn runtime() -> SandboxRuntime {
        SandboxRuntime::new(
            SandboxConfiguration::default(),
            Arc::new(InMemoryClassSource::from_classes(classes())),
        )
        .unwrap()
    }

    fn sandbox_exception(rt: &SandboxRuntime, message: &str) -> ObjectRef {
        let class = rt.load_class("sandbox/com/example/MyBaseException").unwrap();
        let obj = rt.new_object(&class).unwrap();
        let message = rt.sandbox_string(message).unwrap();
        rt.invoke_special(
            "sandbox/com/example/MyBaseException",
            "<init>",
            "(Lsandbox/java/lang/String;)V",
            vec![Value::Ref(obj.clone()), Value::Ref(message)],
        )
        .unwrap();
        obj
    }

    #[test]
    fn test_strings_and_boxes_round_trip() {
        let rt = runtime();
        let host = Value::Ref(rt.host_string("Hello").unwrap());
        let sandboxed = rt.sandbox(&host).unwrap();
        let Value::Ref(obj) = &sandboxed else { panic!("expected a reference") };
        assert_eq!(obj.class_name(), "sandbox/java/lang/String");
        let back = rt.unsandbox(&sandboxed).unwrap();
        let Value::Ref(obj) = &back else { panic!("expected a reference") };
        assert_eq!((obj.class_name(), obj.as_str()), ("java/lang/String", Some("Hello")));

        let boxed = Value::Ref(rt.new_boxed("java/lang/Integer", Primitive::Int(7)).unwrap());
        let Value::Ref(obj) = rt.sandbox(&boxed).unwrap() else { panic!("expected a reference") };
        assert_eq!(obj.class_name(), "sandbox/java/lang/Integer");
        assert!(matches!(obj.body(), ObjectBody::Boxed(Primitive::Int(7))));

        assert!(rt.sandbox(&Value::Int(3)).unwrap().same(&Value::Int(3)));
    }

    #[test]
    fn test_enum_conversion_preserves_identity() {
        let rt = runtime();
        let host_class = rt.load_class("com/example/Color").unwrap();
        let green = rt.enum_constant_directory(&host_class).unwrap()["GREEN"].clone();
        let Value::Ref(sandboxed) = rt.sandbox(&Value::Ref(green.clone())).unwrap() else {
            panic!("expected a reference")
        };
        assert_eq!(sandboxed.class_name(), "sandbox/com/example/Color");
        let sandbox_class = rt.load_class("sandbox/com/example/Color").unwrap();
        assert!(Arc::ptr_eq(&sandboxed, &rt.enum_constants(&sandbox_class).unwrap().unwrap()[1]));
        let Value::Ref(back) = rt.unsandbox(&Value::Ref(sandboxed)).unwrap() else {
            panic!("expected a reference")
        };
        assert!(Arc::ptr_eq(&back, &green));
    }

    #[test]
    fn test_arrays_are_converted_element_wise() {
        let rt = runtime();
        let elements = vec![
            Value::Ref(rt.host_string("a").unwrap()),
            Value::Null,
        ];
        let array = rt.new_array("[Ljava/lang/String;", elements).unwrap();
        let Value::Ref(sandboxed) = rt.sandbox(&Value::Ref(array)).unwrap() else {
            panic!("expected a reference")
        };
        assert_eq!(sandboxed.class_name(), "[Lsandbox/java/lang/String;");
        let items = sandboxed.elements().unwrap().clone();
        assert!(matches!(&items[0], Value::Ref(s) if s.class_name() == "sandbox/java/lang/String"));
        assert!(items[1].is_null());

        let ints = rt.new_array("[I", vec![Value::Int(1)]).unwrap();
        let Value::Ref(same) = rt.sandbox(&Value::Ref(ints.clone())).unwrap() else {
            panic!("expected a reference")
        };
        assert!(Arc::ptr_eq(&same, &ints));
    }

    #[test]
    fn test_sandbox_exception_becomes_shadow_and_back() {
        let rt = runtime();
        let original = sandbox_exception(&rt, "boom");
        let shadow = rt.from_djvm(&original).unwrap();
        assert_eq!(shadow.class_name(), "sandbox/com/example/MyBaseException$1DJVM");
        assert!(shadow.is_instance_of("java/lang/Exception"));
        assert_eq!(shadow.throwable_message().as_deref(), Some("boom"));
        assert!(Arc::ptr_eq(&rt.to_djvm(&shadow).unwrap(), &original));
    }

    #[test]
    fn test_host_exceptions_keep_their_class() {
        let rt = runtime();
        let npe = rt.new_host_throwable("java/lang/NullPointerException", Some("npe")).unwrap();
        let sandboxed = rt.to_djvm(&npe).unwrap();
        assert_eq!(sandboxed.class_name(), "sandbox/java/lang/NullPointerException");
        let message = sandboxed.throwable().unwrap().message.clone();
        assert!(matches!(&message, Value::Ref(m) if m.class_name() == "sandbox/java/lang/String"));

        let host = rt.from_djvm(&sandboxed).unwrap();
        assert_eq!(host.class_name(), "java/lang/NullPointerException");
        assert_eq!(host.throwable_message().as_deref(), Some("npe"));
    }

    #[test]
    fn test_fatal_signals_are_wrapped_not_converted() {
        let rt = runtime();
        let fatal = rt
            .new_host_throwable("djvm/rules/RuleViolationError", Some("no"))
            .unwrap();
        let wrapper = rt.to_djvm(&fatal).unwrap();
        assert_eq!(wrapper.class_name(), "sandbox/java/lang/ThrowableWrapper");
        assert!(Arc::ptr_eq(&rt.from_djvm(&wrapper).unwrap(), &fatal));
    }

    #[test]
    fn test_host_throwable_without_sandbox_class_is_wrapped() {
        let analysis = AnalysisConfiguration::builder()
            .with_pinned_class("com/example/HostOnly")
            .build()
            .unwrap();
        let rt = SandboxRuntime::new(
            SandboxConfiguration::new(analysis),
            Arc::new(InMemoryClassSource::from_classes(vec![ClassFile::new(
                "com/example/HostOnly",
                Some("java/lang/RuntimeException"),
            )])),
        )
        .unwrap();
        let host_only = rt.new_host_throwable("com/example/HostOnly", None).unwrap();
        let wrapped = rt.to_djvm(&host_only).unwrap();
        assert_eq!(wrapped.class_name(), "sandbox/java/lang/ThrowableWrapper");
        let carried = rt.from_djvm(&wrapped).unwrap();
        assert_eq!(carried.class_name(), "java/lang/ClassNotFoundException");
        assert_eq!(
            carried.throwable_message().as_deref(),
            Some("sandbox/com/example/HostOnly")
        );
    }

    #[test]
    fn test_conversion_failure_is_rule_violation() {
        let rt = runtime();
        let not_a_throwable = rt.sandbox_string("oops").unwrap();
        let err = rt.from_djvm(&not_a_throwable).unwrap_err();
        assert!(matches!(err, SandboxError::RuleViolation(_)));
        assert!(!err.is_catchable());
    }

    #[test]
    fn test_class_for_name_honours_denylist() {
        let rt = runtime();
        assert!(matches!(
            rt.class_for_name("java.lang.DJVM"),
            Err(SandboxError::ClassNotFound(name)) if name == "java.lang.DJVM"
        ));
        assert!(matches!(rt.class_for_name("djvm.rules.RuleViolationError"), Err(SandboxError::ClassNotFound(_))));
        let class = rt.class_for_name("com.example.MyBaseException").unwrap();
        assert_eq!(class.name(), "sandbox/com/example/MyBaseException");
        assert!(matches!(
            rt.class_for_name("com.example.Missing"),
            Err(SandboxError::ClassNotFound(name)) if name == "sandbox/com/example/Missing"
        ));
        // The prefix is applied even to names that already carry it.
        assert!(matches!(
            rt.class_for_name("sandbox.com.example.MyBaseException"),
            Err(SandboxError::ClassNotFound(name)) if name == "sandbox/sandbox/com/example/MyBaseException"
        ));
    }
}
