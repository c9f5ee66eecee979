//! Plain-data host values.
//!
//! [`HostValue`] is how callers outside the runtime pass inputs in and read
//! results out. Class names are internal names; array components are class
//! names or primitive descriptors (`I`, `J`, ...).

use super::object::{ObjectBody, Primitive, Value};
use super::SandboxRuntime;
use crate::errors::SandboxError;
use crate::exceptions::host_owner_of;
use crate::well_known::host;
use djvm_types::bytecode::CONSTRUCTOR_NAME;
use djvm_types::descriptor::array_of;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostValue {
    Null,
    Boolean(bool),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Enum {
        class: String,
        name: String,
    },
    Array {
        component: String,
        elements: Vec<HostValue>,
    },
    Throwable {
        class: String,
        message: Option<String>,
    },
    /// Any other object, by class.
    Object {
        class: String,
    },
}

impl HostValue {
    pub fn string(value: impl Into<String>) -> Self {
        HostValue::String(value.into())
    }

    pub fn strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HostValue::Array {
            component: host::STRING.to_string(),
            elements: values.into_iter().map(|s| HostValue::String(s.into())).collect(),
        }
    }
}

fn is_primitive_descriptor(component: &str) -> bool {
    matches!(component, "Z" | "C" | "B" | "S" | "I" | "J" | "F" | "D")
}

fn array_class_of(component: &str) -> String {
    if is_primitive_descriptor(component) {
        format!("[{}", component)
    } else {
        array_of(component)
    }
}

fn boxed(value: Primitive) -> (&'static str, Primitive) {
    let class = match value {
        Primitive::Boolean(_) => host::BOOLEAN,
        Primitive::Char(_) => host::CHARACTER,
        Primitive::Byte(_) => host::BYTE,
        Primitive::Short(_) => host::SHORT,
        Primitive::Int(_) => host::INTEGER,
        Primitive::Long(_) => host::LONG,
        Primitive::Float(_) => host::FLOAT,
        Primitive::Double(_) => host::DOUBLE,
    };
    (class, value)
}

impl SandboxRuntime {
    /// Materialise a host value as a host-world object. Primitives are boxed.
    pub fn to_host_object(&self, value: &HostValue) -> Result<Value, SandboxError> {
        let primitive = match value {
            HostValue::Boolean(v) => Some(Primitive::Boolean(*v)),
            HostValue::Char(v) => Some(Primitive::Char(*v)),
            HostValue::Byte(v) => Some(Primitive::Byte(*v)),
            HostValue::Short(v) => Some(Primitive::Short(*v)),
            HostValue::Int(v) => Some(Primitive::Int(*v)),
            HostValue::Long(v) => Some(Primitive::Long(*v)),
            HostValue::Float(v) => Some(Primitive::Float(*v)),
            HostValue::Double(v) => Some(Primitive::Double(*v)),
            _ => None,
        };
        if let Some(primitive) = primitive {
            let (class, value) = boxed(primitive);
            return Ok(Value::Ref(self.new_boxed(class, value)?));
        }

        let obj = match value {
            HostValue::String(text) => self.host_string(text)?,
            HostValue::Enum { class, name } => {
                let class = self.load_class(class)?;
                let directory = self.enum_constant_directory(&class)?;
                directory.get(name).cloned().ok_or_else(|| {
                    self.throw_host(
                        host::ILLEGAL_ARGUMENT,
                        format!("No enum constant {}.{}", class.name(), name),
                    )
                })?
            }
            HostValue::Array { component, elements } => {
                let raw = is_primitive_descriptor(component);
                let values = elements
                    .iter()
                    .map(|element| {
                        if raw {
                            primitive_slot(element)
                        } else {
                            self.to_host_object(element)
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.new_array(&array_class_of(component), values)?
            }
            HostValue::Throwable { class, message } => self.new_host_throwable(class, message.as_deref())?,
            HostValue::Object { class } => {
                let class = self.load_class(class)?;
                let obj = self.new_object(&class)?;
                self.invoke_special(class.name(), CONSTRUCTOR_NAME, "()V", vec![Value::Ref(obj.clone())])?;
                obj
            }
            _ => return Ok(Value::Null),
        };
        Ok(Value::Ref(obj))
    }

    /// Describe a host-world value as plain data. Shadow exceptions are
    /// reported as the class they stand for.
    pub fn to_host_value(&self, value: &Value) -> Result<HostValue, SandboxError> {
        let obj = match value {
            Value::Null => return Ok(HostValue::Null),
            Value::Int(v) => return Ok(HostValue::Int(*v)),
            Value::Long(v) => return Ok(HostValue::Long(*v)),
            Value::Float(v) => return Ok(HostValue::Float(*v)),
            Value::Double(v) => return Ok(HostValue::Double(*v)),
            Value::Ref(obj) => obj,
        };
        Ok(match obj.body() {
            ObjectBody::Str(text) => HostValue::String(text.clone()),
            ObjectBody::Boxed(primitive) => match *primitive {
                Primitive::Boolean(v) => HostValue::Boolean(v),
                Primitive::Char(v) => HostValue::Char(v),
                Primitive::Byte(v) => HostValue::Byte(v),
                Primitive::Short(v) => HostValue::Short(v),
                Primitive::Int(v) => HostValue::Int(v),
                Primitive::Long(v) => HostValue::Long(v),
                Primitive::Float(v) => HostValue::Float(v),
                Primitive::Double(v) => HostValue::Double(v),
            },
            ObjectBody::Enum { name, .. } => HostValue::Enum {
                class: obj.class_name().to_string(),
                name: name.clone(),
            },
            ObjectBody::Array(items) => {
                let items = items.lock().clone();
                HostValue::Array {
                    component: obj.class().component_type().unwrap_or(host::OBJECT).to_string(),
                    elements: items
                        .iter()
                        .map(|item| self.to_host_value(item))
                        .collect::<Result<Vec<_>, _>>()?,
                }
            }
            ObjectBody::Throwable(_) => {
                let class = match host_owner_of(obj.class_name()) {
                    Some(owner) => self.namespace().from_sandbox_internal(owner),
                    None => obj.class_name().to_string(),
                };
                HostValue::Throwable {
                    class,
                    message: obj.throwable_message(),
                }
            }
            ObjectBody::Instance | ObjectBody::List(_) => HostValue::Object {
                class: obj.class_name().to_string(),
            },
        })
    }
}

/// A primitive array element, stored unboxed.
fn primitive_slot(value: &HostValue) -> Result<Value, SandboxError> {
    Ok(match value {
        HostValue::Boolean(v) => Value::Int(i32::from(*v)),
        HostValue::Char(v) => Value::Int(*v as i32),
        HostValue::Byte(v) => Value::Int(i32::from(*v)),
        HostValue::Short(v) => Value::Int(i32::from(*v)),
        HostValue::Int(v) => Value::Int(*v),
        HostValue::Long(v) => Value::Long(*v),
        HostValue::Float(v) => Value::Float(*v),
        HostValue::Double(v) => Value::Double(*v),
        other => {
            return Err(SandboxError::verification(format!(
                "{:?} cannot be stored in a primitive array",
                other
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfiguration;
    use crate::runtime::loader::InMemoryClassSource;
    use std::sync::Arc;

    fn runtime() -> SandboxRuntime {
        SandboxRuntime::new(SandboxConfiguration::default(), Arc::new(InMemoryClassSource::new())).unwrap()
    }

    #[test]
    fn test_values_survive_materialisation() {
        let rt = runtime();
        for value in [
            HostValue::Null,
            HostValue::Int(42),
            HostValue::Char('x'),
            HostValue::string("Hello"),
            HostValue::strings(["a", "b"]),
            HostValue::Array {
                component: "I".into(),
                elements: vec![HostValue::Int(1), HostValue::Int(2)],
            },
            HostValue::Throwable {
                class: "java/lang/IllegalStateException".into(),
                message: Some("bad".into()),
            },
        ] {
            let object = rt.to_host_object(&value).unwrap();
            assert_eq!(rt.to_host_value(&object).unwrap(), value);
        }
    }

    #[test]
    fn test_serde_shape() {
        let value = HostValue::Enum {
            class: "com/example/Color".into(),
            name: "RED".into(),
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"enum":{"class":"com/example/Color","name":"RED"}}"#);
        assert_eq!(serde_json::from_str::<HostValue>(r#""null""#).unwrap(), HostValue::Null);
        assert_eq!(serde_json::from_str::<HostValue>(r#"{"int":5}"#).unwrap(), HostValue::Int(5));
    }
}
