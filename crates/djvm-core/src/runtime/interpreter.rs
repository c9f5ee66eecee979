//! The bytecode interpreter.
//!
//! One [`Frame`] per invocation. A thrown object is matched against the
//! method's exception table in declaration order; the first entry whose range
//! covers the faulting instruction and whose type the object is an instance
//! of receives it. Hard errors skip the table entirely.

use super::class::RuntimeMethod;
use super::object::{ObjectRef, Value};
use super::SandboxRuntime;
use crate::errors::SandboxError;
use crate::well_known::host;
use djvm_types::bytecode::{Constant, Instruction, Label, Opcode};
use djvm_types::descriptor::array_of;
use djvm_types::MethodDescriptor;
use std::cmp::Ordering;
use std::sync::Arc;

enum Flow {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

struct Frame {
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn new(method: &RuntimeMethod, args: Vec<Value>) -> Self {
        let highest_local = method
            .code
            .iter()
            .filter_map(|insn| match insn {
                Instruction::VarInsn { var, .. } | Instruction::Iinc { var, .. } => Some(*var as usize + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let mut locals = args;
        let size = highest_local.max(locals.len());
        locals.resize(size, Value::Null);
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, SandboxError> {
        self.stack
            .pop()
            .ok_or_else(|| SandboxError::verification("operand stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i32, SandboxError> {
        self.pop()?.as_int()
    }

    fn pop_long(&mut self) -> Result<i64, SandboxError> {
        self.pop()?.as_long()
    }

    fn pop_reference(&mut self) -> Result<Option<ObjectRef>, SandboxError> {
        Ok(self.pop()?.as_reference()?.cloned())
    }

    fn peek(&self) -> Result<&Value, SandboxError> {
        self.stack
            .last()
            .ok_or_else(|| SandboxError::verification("operand stack underflow"))
    }

    fn local(&self, var: u16) -> Result<&Value, SandboxError> {
        self.locals
            .get(var as usize)
            .ok_or_else(|| SandboxError::verification(format!("no local variable {}", var)))
    }

    fn set_local(&mut self, var: u16, value: Value) -> Result<(), SandboxError> {
        let slot = self
            .locals
            .get_mut(var as usize)
            .ok_or_else(|| SandboxError::verification(format!("no local variable {}", var)))?;
        *slot = value;
        Ok(())
    }

    /// Pop `count` arguments, returned in call order.
    fn pop_arguments(&mut self, count: usize) -> Result<Vec<Value>, SandboxError> {
        if self.stack.len() < count {
            return Err(SandboxError::verification("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }
}

pub(crate) fn execute(
    rt: &SandboxRuntime,
    method: &Arc<RuntimeMethod>,
    args: Vec<Value>,
) -> Result<Option<Value>, SandboxError> {
    let mut frame = Frame::new(method, args);
    let mut pc = 0usize;
    loop {
        let insn = method.code.get(pc).ok_or_else(|| {
            SandboxError::verification(format!(
                "{}.{}{}: fell off the end of the code",
                method.owner, method.name, method.descriptor
            ))
        })?;
        match step(rt, &mut frame, insn) {
            Ok(Flow::Next) => pc += 1,
            Ok(Flow::Jump(label)) => pc = target(method, label)?,
            Ok(Flow::Return(value)) => return Ok(value),
            Err(SandboxError::Thrown(thrown)) => match find_handler(method, pc, &thrown) {
                Some(handler) => {
                    frame.stack.clear();
                    frame.push(Value::Ref(thrown));
                    pc = handler;
                }
                None => return Err(SandboxError::Thrown(thrown)),
            },
            Err(err) => return Err(err),
        }
    }
}

fn target(method: &RuntimeMethod, label: Label) -> Result<usize, SandboxError> {
    method
        .labels
        .get(&label)
        .copied()
        .ok_or_else(|| SandboxError::verification(format!("unknown label {}", label)))
}

fn find_handler(method: &RuntimeMethod, pc: usize, thrown: &ObjectRef) -> Option<usize> {
    method
        .handlers
        .iter()
        .find(|entry| {
            pc >= entry.start
                && pc < entry.end
                && entry
                    .catch_type
                    .as_deref()
                    .map_or(true, |catch_type| thrown.is_instance_of(catch_type))
        })
        .map(|entry| entry.handler)
}

fn null_pointer(rt: &SandboxRuntime, what: &str) -> SandboxError {
    rt.throw_host(host::NULL_POINTER, format!("Cannot {} because value is null", what))
}

fn non_null(rt: &SandboxRuntime, value: Option<ObjectRef>, what: &str) -> Result<ObjectRef, SandboxError> {
    value.ok_or_else(|| null_pointer(rt, what))
}

fn array_index(rt: &SandboxRuntime, index: i32, length: usize) -> Result<usize, SandboxError> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < length)
        .ok_or_else(|| {
            rt.throw_host(
                host::ARRAY_INDEX_OUT_OF_BOUNDS,
                format!("Index {} out of bounds for length {}", index, length),
            )
        })
}

fn int_arithmetic(rt: &SandboxRuntime, opcode: Opcode, a: i32, b: i32) -> Result<i32, SandboxError> {
    let divide_by_zero = || rt.throw_host(host::ARITHMETIC, "/ by zero");
    Ok(match opcode {
        Opcode::Iadd => a.wrapping_add(b),
        Opcode::Isub => a.wrapping_sub(b),
        Opcode::Imul => a.wrapping_mul(b),
        Opcode::Idiv if b == 0 => return Err(divide_by_zero()),
        Opcode::Idiv => a.wrapping_div(b),
        Opcode::Irem if b == 0 => return Err(divide_by_zero()),
        Opcode::Irem => a.wrapping_rem(b),
        _ => return Err(SandboxError::verification(format!("{} is not an int operation", opcode))),
    })
}

fn long_arithmetic(rt: &SandboxRuntime, opcode: Opcode, a: i64, b: i64) -> Result<i64, SandboxError> {
    Ok(match opcode {
        Opcode::Ladd => a.wrapping_add(b),
        Opcode::Lsub => a.wrapping_sub(b),
        Opcode::Lmul => a.wrapping_mul(b),
        Opcode::Ldiv if b == 0 => return Err(rt.throw_host(host::ARITHMETIC, "/ by zero")),
        Opcode::Ldiv => a.wrapping_div(b),
        _ => return Err(SandboxError::verification(format!("{} is not a long operation", opcode))),
    })
}

/// Array class for a `NEWARRAY` type code.
fn primitive_array_class(code: i32) -> Result<&'static str, SandboxError> {
    Ok(match code {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        other => return Err(SandboxError::verification(format!("invalid array type {}", other))),
    })
}

fn new_array_length(rt: &SandboxRuntime, count: i32) -> Result<usize, SandboxError> {
    usize::try_from(count).map_err(|_| rt.throw_host(host::NEGATIVE_ARRAY_SIZE, count.to_string()))
}

fn step(rt: &SandboxRuntime, frame: &mut Frame, insn: &Instruction) -> Result<Flow, SandboxError> {
    if matches!(
        insn,
        Instruction::Label { .. } | Instruction::TryCatchBlock { .. } | Instruction::LineNumber { .. }
    ) {
        return Ok(Flow::Next);
    }
    rt.charge_instruction()?;

    match insn {
        Instruction::Insn { opcode } => simple(rt, frame, *opcode),
        Instruction::IntInsn { opcode, operand } => match opcode {
            Opcode::Bipush | Opcode::Sipush => {
                frame.push(Value::Int(*operand));
                Ok(Flow::Next)
            }
            Opcode::Newarray => {
                let class = primitive_array_class(*operand)?;
                let length = new_array_length(rt, frame.pop_int()?)?;
                let zero = match class {
                    "[J" => Value::Long(0),
                    "[F" => Value::Float(0.0),
                    "[D" => Value::Double(0.0),
                    _ => Value::Int(0),
                };
                frame.push(Value::Ref(rt.new_array(class, vec![zero; length])?));
                Ok(Flow::Next)
            }
            other => Err(SandboxError::verification(format!("{} takes no int operand", other))),
        },
        Instruction::VarInsn { opcode, var } => {
            match opcode {
                Opcode::Iload | Opcode::Lload | Opcode::Fload | Opcode::Dload | Opcode::Aload => {
                    let value = frame.local(*var)?.clone();
                    frame.push(value);
                }
                Opcode::Istore | Opcode::Lstore | Opcode::Fstore | Opcode::Dstore | Opcode::Astore => {
                    let value = frame.pop()?;
                    frame.set_local(*var, value)?;
                }
                other => {
                    return Err(SandboxError::verification(format!(
                        "{} is not a local variable instruction",
                        other
                    )))
                }
            }
            Ok(Flow::Next)
        }
        Instruction::Iinc { var, increment } => {
            let value = frame.local(*var)?.as_int()?;
            frame.set_local(*var, Value::Int(value.wrapping_add(*increment)))?;
            Ok(Flow::Next)
        }
        Instruction::TypeInsn { opcode, type_name } => type_instruction(rt, frame, *opcode, type_name),
        Instruction::FieldInsn {
            opcode,
            owner,
            name,
            descriptor: _,
        } => field_instruction(rt, frame, *opcode, owner, name),
        Instruction::MethodInsn {
            opcode,
            owner,
            name,
            descriptor,
            ..
        } => method_instruction(rt, frame, *opcode, owner, name, descriptor),
        Instruction::JumpInsn { opcode, label } => jump(frame, *opcode, *label),
        Instruction::Ldc { constant } => {
            let value = match constant {
                Constant::Int(v) => Value::Int(*v),
                Constant::Long(v) => Value::Long(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Double(v) => Value::Double(*v),
                Constant::String(s) => Value::Ref(rt.host_string(s)?),
                Constant::Type(t) => {
                    return Err(SandboxError::verification(format!(
                        "class literal {} is not supported",
                        t
                    )))
                }
            };
            frame.push(value);
            Ok(Flow::Next)
        }
        Instruction::Label { .. } | Instruction::TryCatchBlock { .. } | Instruction::LineNumber { .. } => {
            Ok(Flow::Next)
        }
    }
}

fn simple(rt: &SandboxRuntime, frame: &mut Frame, opcode: Opcode) -> Result<Flow, SandboxError> {
    match opcode {
        Opcode::Nop => {}
        Opcode::AconstNull => frame.push(Value::Null),
        Opcode::IconstM1 => frame.push(Value::Int(-1)),
        Opcode::Iconst0 => frame.push(Value::Int(0)),
        Opcode::Iconst1 => frame.push(Value::Int(1)),
        Opcode::Iconst2 => frame.push(Value::Int(2)),
        Opcode::Iconst3 => frame.push(Value::Int(3)),
        Opcode::Iconst4 => frame.push(Value::Int(4)),
        Opcode::Iconst5 => frame.push(Value::Int(5)),
        Opcode::Lconst0 => frame.push(Value::Long(0)),
        Opcode::Lconst1 => frame.push(Value::Long(1)),
        Opcode::Pop => {
            frame.pop()?;
        }
        Opcode::Dup => {
            let top = frame.peek()?.clone();
            frame.push(top);
        }
        Opcode::DupX1 => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            frame.push(first.clone());
            frame.push(second);
            frame.push(first);
        }
        Opcode::Swap => {
            let first = frame.pop()?;
            let second = frame.pop()?;
            frame.push(first);
            frame.push(second);
        }
        Opcode::Iadd | Opcode::Isub | Opcode::Imul | Opcode::Idiv | Opcode::Irem => {
            let b = frame.pop_int()?;
            let a = frame.pop_int()?;
            frame.push(Value::Int(int_arithmetic(rt, opcode, a, b)?));
        }
        Opcode::Ineg => {
            let a = frame.pop_int()?;
            frame.push(Value::Int(a.wrapping_neg()));
        }
        Opcode::Ladd | Opcode::Lsub | Opcode::Lmul | Opcode::Ldiv => {
            let b = frame.pop_long()?;
            let a = frame.pop_long()?;
            frame.push(Value::Long(long_arithmetic(rt, opcode, a, b)?));
        }
        Opcode::I2l => {
            let a = frame.pop_int()?;
            frame.push(Value::Long(i64::from(a)));
        }
        Opcode::L2i => {
            let a = frame.pop_long()?;
            frame.push(Value::Int(a as i32));
        }
        Opcode::Arraylength => {
            let array = non_null(rt, frame.pop_reference()?, "read the array length")?;
            let length = array
                .elements()
                .ok_or_else(|| SandboxError::verification("ARRAYLENGTH on a non-array"))?
                .len();
            frame.push(Value::Int(length as i32));
        }
        Opcode::Iaload | Opcode::Aaload => {
            let index = frame.pop_int()?;
            let array = non_null(rt, frame.pop_reference()?, "load from array")?;
            let value = {
                let elements = array
                    .elements()
                    .ok_or_else(|| SandboxError::verification("array load from a non-array"))?;
                let slot = array_index(rt, index, elements.len())?;
                elements[slot].clone()
            };
            frame.push(value);
        }
        Opcode::Iastore | Opcode::Aastore => {
            let value = frame.pop()?;
            let index = frame.pop_int()?;
            let array = non_null(rt, frame.pop_reference()?, "store to array")?;
            let mut elements = array
                .elements()
                .ok_or_else(|| SandboxError::verification("array store to a non-array"))?;
            let slot = array_index(rt, index, elements.len())?;
            elements[slot] = value;
        }
        Opcode::Athrow => {
            let thrown = non_null(rt, frame.pop_reference()?, "throw exception")?;
            if !thrown.is_instance_of(host::THROWABLE) {
                return Err(SandboxError::verification(format!(
                    "ATHROW of non-throwable {}",
                    thrown.class_name()
                )));
            }
            return Err(SandboxError::Thrown(thrown));
        }
        Opcode::Return => return Ok(Flow::Return(None)),
        Opcode::Ireturn | Opcode::Lreturn | Opcode::Freturn | Opcode::Dreturn | Opcode::Areturn => {
            return Ok(Flow::Return(Some(frame.pop()?)))
        }
        Opcode::Monitorenter | Opcode::Monitorexit => {
            // Execution inside one runtime is single-threaded.
            non_null(rt, frame.pop_reference()?, "enter synchronized block")?;
        }
        other => {
            return Err(SandboxError::verification(format!(
                "{} needs an operand",
                other
            )))
        }
    }
    Ok(Flow::Next)
}

fn type_instruction(
    rt: &SandboxRuntime,
    frame: &mut Frame,
    opcode: Opcode,
    type_name: &str,
) -> Result<Flow, SandboxError> {
    match opcode {
        Opcode::New => {
            let class = rt.load_class(type_name)?;
            frame.push(Value::Ref(rt.new_object(&class)?));
        }
        Opcode::Anewarray => {
            let length = new_array_length(rt, frame.pop_int()?)?;
            let array = rt.new_array(&array_of(type_name), vec![Value::Null; length])?;
            frame.push(Value::Ref(array));
        }
        Opcode::Checkcast => {
            if let Some(obj) = frame.peek()?.as_reference()? {
                if !obj.is_instance_of(type_name) {
                    // Make sure the target exists before reporting the cast.
                    rt.load_class(type_name)?;
                    return Err(rt.throw_host(
                        host::CLASS_CAST,
                        format!("class {} cannot be cast to class {}", obj.class_name(), type_name),
                    ));
                }
            }
        }
        Opcode::Instanceof => {
            let obj = frame.pop_reference()?;
            let result = obj.map_or(false, |o| o.is_instance_of(type_name));
            frame.push(Value::Int(i32::from(result)));
        }
        other => {
            return Err(SandboxError::verification(format!(
                "{} takes no type operand",
                other
            )))
        }
    }
    Ok(Flow::Next)
}

fn field_instruction(
    rt: &SandboxRuntime,
    frame: &mut Frame,
    opcode: Opcode,
    owner: &str,
    name: &str,
) -> Result<Flow, SandboxError> {
    let no_such_field = || SandboxError::NoSuchField {
        owner: owner.to_string(),
        name: name.to_string(),
    };
    match opcode {
        Opcode::Getstatic | Opcode::Putstatic => {
            let class = rt.load_class(owner)?;
            rt.ensure_initialized(&class)?;
            let declaring = class.static_owner(name).ok_or_else(no_such_field)?;
            if opcode == Opcode::Getstatic {
                let is_constant = declaring
                    .fields()
                    .iter()
                    .any(|f| f.name == name && f.is_enum_constant());
                let value = if is_constant && declaring.is_enum() {
                    let directory = rt.enum_constant_directory(&declaring)?;
                    Value::from(directory.get(name).cloned())
                } else {
                    declaring.get_static(name).ok_or_else(no_such_field)?
                };
                frame.push(value);
            } else {
                let value = frame.pop()?;
                declaring.set_static(name, value);
            }
        }
        Opcode::Getfield => {
            let obj = non_null(rt, frame.pop_reference()?, &format!("read field \"{}\"", name))?;
            frame.push(obj.get_field(name));
        }
        Opcode::Putfield => {
            let value = frame.pop()?;
            let obj = non_null(rt, frame.pop_reference()?, &format!("assign field \"{}\"", name))?;
            obj.set_field(name, value);
        }
        other => {
            return Err(SandboxError::verification(format!(
                "{} is not a field instruction",
                other
            )))
        }
    }
    Ok(Flow::Next)
}

fn method_instruction(
    rt: &SandboxRuntime,
    frame: &mut Frame,
    opcode: Opcode,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> Result<Flow, SandboxError> {
    let parsed = MethodDescriptor::parse(descriptor)
        .map_err(|e| SandboxError::verification(format!("{}.{}: {}", owner, name, e)))?;
    let args = frame.pop_arguments(parsed.parameters.len())?;
    let result = match opcode {
        Opcode::Invokestatic => rt.invoke_static(owner, name, descriptor, args)?,
        Opcode::Invokespecial => {
            let receiver = non_null(rt, frame.pop_reference()?, &format!("invoke \"{}.{}\"", owner, name))?;
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(Value::Ref(receiver));
            full.extend(args);
            rt.invoke_special(owner, name, descriptor, full)?
        }
        Opcode::Invokevirtual | Opcode::Invokeinterface => {
            let receiver = non_null(rt, frame.pop_reference()?, &format!("invoke \"{}.{}\"", owner, name))?;
            rt.invoke_virtual(&receiver, name, descriptor, args)?
        }
        other => {
            return Err(SandboxError::verification(format!(
                "{} is not an invocation",
                other
            )))
        }
    };
    if let Some(value) = result {
        frame.push(value);
    }
    Ok(Flow::Next)
}

fn jump(frame: &mut Frame, opcode: Opcode, label: Label) -> Result<Flow, SandboxError> {
    let taken = match opcode {
        Opcode::Goto => true,
        Opcode::Ifeq | Opcode::Ifne | Opcode::Iflt | Opcode::Ifge | Opcode::Ifgt | Opcode::Ifle => {
            let value = frame.pop_int()?;
            compare(opcode, value.cmp(&0))
        }
        Opcode::IfIcmpeq
        | Opcode::IfIcmpne
        | Opcode::IfIcmplt
        | Opcode::IfIcmpge
        | Opcode::IfIcmpgt
        | Opcode::IfIcmple => {
            let b = frame.pop_int()?;
            let a = frame.pop_int()?;
            compare(opcode, a.cmp(&b))
        }
        Opcode::IfAcmpeq | Opcode::IfAcmpne => {
            let b = frame.pop()?;
            let a = frame.pop()?;
            a.same(&b) == (opcode == Opcode::IfAcmpeq)
        }
        Opcode::Ifnull | Opcode::Ifnonnull => {
            let value = frame.pop()?;
            value.is_null() == (opcode == Opcode::Ifnull)
        }
        other => return Err(SandboxError::verification(format!("{} is not a jump", other))),
    };
    Ok(if taken { Flow::Jump(label) } else { Flow::Next })
}

fn compare(opcode: Opcode, ordering: Ordering) -> bool {
    match opcode {
        Opcode::Ifeq | Opcode::IfIcmpeq => ordering == Ordering::Equal,
        Opcode::Ifne | Opcode::IfIcmpne => ordering != Ordering::Equal,
        Opcode::Iflt | Opcode::IfIcmplt => ordering == Ordering::Less,
        Opcode::Ifge | Opcode::IfIcmpge => ordering != Ordering::Less,
        Opcode::Ifgt | Opcode::IfIcmpgt => ordering == Ordering::Greater,
        Opcode::Ifle | Opcode::IfIcmple => ordering != Ordering::Greater,
        _ => false,
    }
}
