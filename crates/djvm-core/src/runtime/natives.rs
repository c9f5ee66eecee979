//! Native method implementations.
//!
//! Natives are keyed by declaring class, name and descriptor. Instance
//! natives receive the receiver as `args[0]`.

use super::library::throwable_constructors;
use super::object::{ObjectBody, ObjectRef, ThrowableState, Value};
use super::SandboxRuntime;
use crate::config::AnalysisConfiguration;
use crate::errors::SandboxError;
use crate::well_known::host;
use djvm_types::bytecode::CONSTRUCTOR_NAME;
use parking_lot::MutexGuard;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type NativeFn =
    Arc<dyn Fn(&SandboxRuntime, &[Value]) -> Result<Option<Value>, SandboxError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodKey {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

#[derive(Clone, Default)]
pub struct NativeRegistry {
    natives: HashMap<MethodKey, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Natives backing the runtime library for `config`'s namespace.
    pub fn standard(config: &AnalysisConfiguration) -> Self {
        let names = config.names();
        let mut registry = Self::new();

        for object in [host::OBJECT, names.object.as_str()] {
            registry.register(object, CONSTRUCTOR_NAME, "()V", |_, _| Ok(None));
        }

        // Throwable constructors and accessors, both worlds.
        let worlds = [
            (
                host::STRING.to_string(),
                host::THROWABLE.to_string(),
                config
                    .jvm_exceptions()
                    .map(|(name, _)| name.to_string())
                    .collect::<Vec<_>>(),
            ),
            (
                names.string.clone(),
                names.throwable.clone(),
                config.jvm_exception_classes().map(str::to_string).collect(),
            ),
        ];
        for (string, throwable, classes) in &worlds {
            let [no_args, message, message_cause, cause] = throwable_constructors(string, throwable);
            for class in classes {
                registry.register(class, CONSTRUCTOR_NAME, &no_args, |_, _| Ok(None));
                registry.register(class, CONSTRUCTOR_NAME, &message, |_, args| {
                    throwable_init(args, Some(1), None)
                });
                registry.register(class, CONSTRUCTOR_NAME, &message_cause, |_, args| {
                    throwable_init(args, Some(1), Some(2))
                });
                registry.register(class, CONSTRUCTOR_NAME, &cause, |_, args| {
                    throwable_init(args, None, Some(1))
                });
            }
            registry.register(throwable, "getMessage", &format!("()L{};", string), |_, args| {
                let this = receiver(args)?;
                let message = throwable_state(this)?.message.clone();
                Ok(Some(message))
            });
            registry.register(throwable, "getCause", &format!("()L{};", throwable), |_, args| {
                let this = receiver(args)?;
                let cause = throwable_state(this)?.cause.clone();
                Ok(Some(Value::from(cause)))
            });
            registry.register(
                throwable,
                "initCause",
                &format!("(L{};)L{};", throwable, throwable),
                |_, args| {
                    let this = receiver(args)?;
                    throwable_state(this)?.cause = argument(args, 1)?.as_reference()?.cloned();
                    Ok(Some(Value::Ref(this.clone())))
                },
            );
        }
        registry.register(host::THREAD_DEATH, CONSTRUCTOR_NAME, "()V", |_, _| Ok(None));
        for violation in [host::RULE_VIOLATION, host::THRESHOLD_VIOLATION] {
            registry.register(
                violation,
                CONSTRUCTOR_NAME,
                &format!("(L{};)V", host::STRING),
                |_, args| throwable_init(args, Some(1), None),
            );
        }

        // Strings and enums.
        for string in [host::STRING, names.string.as_str()] {
            registry.register(string, "length", "()I", |_, args| {
                let this = receiver(args)?;
                let value = this
                    .as_str()
                    .ok_or_else(|| SandboxError::verification("length() on a non-string"))?;
                Ok(Some(Value::Int(value.chars().count() as i32)))
            });
        }
        registry.register(&names.string, "toDJVM", &names.string_to_djvm_descriptor, |rt, args| {
            match argument(args, 0)?.as_reference()? {
                None => Ok(Some(Value::Null)),
                Some(string) => {
                    let value = string
                        .as_str()
                        .ok_or_else(|| SandboxError::verification("toDJVM on a non-string"))?;
                    Ok(Some(Value::Ref(rt.sandbox_string(value)?)))
                }
            }
        });
        for (enum_class, string) in [
            (host::ENUM, host::STRING),
            (names.enum_class.as_str(), names.string.as_str()),
        ] {
            let string_class = string.to_string();
            registry.register(enum_class, "name", &format!("()L{};", string), move |rt, args| {
                let (name, _) = enum_constant(receiver(args)?)?;
                Ok(Some(Value::Ref(rt.new_string(&string_class, name)?)))
            });
            registry.register(enum_class, "ordinal", "()I", |_, args| {
                let (_, ordinal) = enum_constant(receiver(args)?)?;
                Ok(Some(Value::Int(ordinal as i32)))
            });
        }

        // The bridge.
        registry.register(&names.djvm, "toDJVM", &names.to_djvm_descriptor, |rt, args| {
            match argument(args, 0)?.as_reference()? {
                None => Ok(Some(Value::Null)),
                Some(throwable) => Ok(Some(Value::Ref(rt.to_djvm(throwable)?))),
            }
        });
        registry.register(&names.djvm, "fromDJVM", &names.from_djvm_descriptor, |rt, args| {
            match argument(args, 0)?.as_reference()? {
                None => Ok(Some(Value::Null)),
                Some(throwable) => Ok(Some(Value::Ref(rt.from_djvm(throwable)?))),
            }
        });
        registry.register(&names.djvm, "checkCatch", &names.check_catch_descriptor, |_, args| {
            let caught = argument(args, 0)?;
            match caught.as_reference()? {
                Some(throwable) if throwable.is_instance_of(host::THREAD_DEATH) => {
                    Err(SandboxError::Thrown(throwable.clone()))
                }
                _ => Ok(Some(caught.clone())),
            }
        });

        // Lists.
        let object = format!("L{};", names.object);
        let object_array = format!("[{}", object);
        registry.register(&names.array_list, CONSTRUCTOR_NAME, "()V", |_, _| Ok(None));
        registry.register(&names.array_list, "add", &format!("({})Z", object), |_, args| {
            let element = argument(args, 1)?.clone();
            list_elements(receiver(args)?)?.push(element);
            Ok(Some(Value::Int(1)))
        });
        registry.register(&names.array_list, "size", "()I", |_, args| {
            let size = list_elements(receiver(args)?)?.len();
            Ok(Some(Value::Int(size as i32)))
        });
        registry.register(&names.array_list, "get", &format!("(I){}", object), |rt, args| {
            let index = argument(args, 1)?.as_int()?;
            let elements = list_elements(receiver(args)?)?;
            match usize::try_from(index).ok().and_then(|i| elements.get(i)) {
                Some(element) => Ok(Some(element.clone())),
                None => Err(rt.throw_host(
                    host::INDEX_OUT_OF_BOUNDS,
                    format!("Index {} out of bounds for length {}", index, elements.len()),
                )),
            }
        });
        registry.register(
            &names.array_list,
            "toArray",
            &format!("({}){}", object_array, object_array),
            |rt, args| {
                let template = argument(args, 1)?
                    .as_reference()?
                    .cloned()
                    .ok_or_else(|| rt.throw_host(host::NULL_POINTER, "toArray(null)"))?;
                let elements = list_elements(receiver(args)?)?.clone();
                let array = rt.new_array(template.class_name(), elements)?;
                Ok(Some(Value::Ref(array)))
            },
        );

        registry
    }

    pub fn register<F>(&mut self, owner: &str, name: &str, descriptor: &str, native: F)
    where
        F: Fn(&SandboxRuntime, &[Value]) -> Result<Option<Value>, SandboxError>
            + Send
            + Sync
            + 'static,
    {
        self.natives
            .insert(MethodKey::new(owner, name, descriptor), Arc::new(native));
    }

    /// Add every native of `other`, replacing existing entries.
    pub fn extend(&mut self, other: &NativeRegistry) {
        for (key, native) in &other.natives {
            self.natives.insert(key.clone(), native.clone());
        }
    }

    pub fn get(&self, owner: &str, name: &str, descriptor: &str) -> Option<&NativeFn> {
        self.natives.get(&MethodKey::new(owner, name, descriptor))
    }

    pub fn contains(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.get(owner, name, descriptor).is_some()
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("natives", &self.natives.len())
            .finish()
    }
}

fn argument(args: &[Value], index: usize) -> Result<&Value, SandboxError> {
    args.get(index)
        .ok_or_else(|| SandboxError::verification(format!("missing native argument {}", index)))
}

fn receiver(args: &[Value]) -> Result<&ObjectRef, SandboxError> {
    argument(args, 0)?
        .as_reference()?
        .ok_or_else(|| SandboxError::verification("native instance method called on null"))
}

fn throwable_state(obj: &ObjectRef) -> Result<MutexGuard<'_, ThrowableState>, SandboxError> {
    obj.throwable()
        .ok_or_else(|| SandboxError::verification(format!("{} is not a throwable", obj.class_name())))
}

fn list_elements(obj: &ObjectRef) -> Result<MutexGuard<'_, Vec<Value>>, SandboxError> {
    match obj.body() {
        ObjectBody::List(_) => obj
            .elements()
            .ok_or_else(|| SandboxError::verification("list without elements")),
        _ => Err(SandboxError::verification(format!(
            "{} is not a list",
            obj.class_name()
        ))),
    }
}

fn enum_constant(obj: &ObjectRef) -> Result<(&str, usize), SandboxError> {
    match obj.body() {
        ObjectBody::Enum { name, ordinal } => Ok((name, *ordinal)),
        _ => Err(SandboxError::verification(format!(
            "{} is not an enum constant",
            obj.class_name()
        ))),
    }
}

fn throwable_init(
    args: &[Value],
    message: Option<usize>,
    cause: Option<usize>,
) -> Result<Option<Value>, SandboxError> {
    let this = receiver(args)?;
    let mut state = throwable_state(this)?;
    if let Some(index) = message {
        state.message = argument(args, index)?.clone();
    }
    if let Some(index) = cause {
        state.cause = argument(args, index)?.as_reference()?.cloned();
    }
    Ok(None)
}
