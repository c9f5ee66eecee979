//! Managed-bytecode model.
//!
//! A [`ClassFile`] is a class header plus fields and methods. Each method body
//! is a linear stream of [`Instruction`]s in the order a class-file reader
//! would report them: try/catch declarations come first, followed by code with
//! [`Label`] markers that jumps and exception tables refer to.
//!
//! The whole model is `serde` serialisable so classes can be stored, diffed and
//! fed to the command line as JSON.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// =============================================================================
// Access flags
// =============================================================================

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_ENUM: u16 = 0x4000;

/// Constructor method name.
pub const CONSTRUCTOR_NAME: &str = "<init>";
/// Static initialiser method name.
pub const CLASS_INITIALISER_NAME: &str = "<clinit>";

// =============================================================================
// Instructions
// =============================================================================

/// A code position marker, scoped to one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Instruction opcodes. The operand shape is given by the [`Instruction`] variant
/// that carries the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // No operand
    Nop,
    AconstNull,
    IconstM1,
    Iconst0,
    Iconst1,
    Iconst2,
    Iconst3,
    Iconst4,
    Iconst5,
    Lconst0,
    Lconst1,
    Pop,
    Dup,
    DupX1,
    Swap,
    Iadd,
    Isub,
    Imul,
    Idiv,
    Irem,
    Ineg,
    Ladd,
    Lsub,
    Lmul,
    Ldiv,
    I2l,
    L2i,
    Arraylength,
    Iaload,
    Aaload,
    Iastore,
    Aastore,
    Athrow,
    Return,
    Ireturn,
    Lreturn,
    Freturn,
    Dreturn,
    Areturn,
    Monitorenter,
    Monitorexit,
    // Int operand
    Bipush,
    Sipush,
    Newarray,
    // Local variable
    Iload,
    Lload,
    Fload,
    Dload,
    Aload,
    Istore,
    Lstore,
    Fstore,
    Dstore,
    Astore,
    // Type operand
    New,
    Anewarray,
    Checkcast,
    Instanceof,
    // Field
    Getstatic,
    Putstatic,
    Getfield,
    Putfield,
    // Method
    Invokevirtual,
    Invokespecial,
    Invokestatic,
    Invokeinterface,
    // Jump
    Goto,
    Ifeq,
    Ifne,
    Iflt,
    Ifge,
    Ifgt,
    Ifle,
    IfIcmpeq,
    IfIcmpne,
    IfIcmplt,
    IfIcmpge,
    IfIcmpgt,
    IfIcmple,
    IfAcmpeq,
    IfAcmpne,
    Ifnull,
    Ifnonnull,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Serialised form is the canonical mnemonic.
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// `NEWARRAY` operand for `int[]`.
pub const T_INT: i32 = 10;

/// Loadable constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// A class literal, by internal name or array descriptor.
    Type(String),
}

/// What a try block catches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TryBlockKind {
    /// Catches `exception_type` and its subclasses.
    Catch { exception_type: String },
    /// Catches everything. `is_monitor` marks the compiler-generated handler
    /// that releases a monitor.
    Finally { is_monitor: bool },
}

/// A protected region `[start, end)` and its handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TryBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub kind: TryBlockKind,
}

impl TryBlock {
    /// The declared exception type, `None` for finally handlers.
    pub fn exception_type(&self) -> Option<&str> {
        match &self.kind {
            TryBlockKind::Catch { exception_type } => Some(exception_type),
            TryBlockKind::Finally { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    Insn {
        opcode: Opcode,
    },
    IntInsn {
        opcode: Opcode,
        operand: i32,
    },
    VarInsn {
        opcode: Opcode,
        var: u16,
    },
    Iinc {
        var: u16,
        increment: i32,
    },
    TypeInsn {
        opcode: Opcode,
        type_name: String,
    },
    FieldInsn {
        opcode: Opcode,
        owner: String,
        name: String,
        descriptor: String,
    },
    MethodInsn {
        opcode: Opcode,
        owner: String,
        name: String,
        descriptor: String,
        #[serde(default)]
        is_interface: bool,
    },
    JumpInsn {
        opcode: Opcode,
        label: Label,
    },
    Ldc {
        constant: Constant,
    },
    Label {
        label: Label,
    },
    TryCatchBlock {
        block: TryBlock,
    },
    LineNumber {
        line: u32,
        label: Label,
    },
}

impl Instruction {
    pub fn insn(opcode: Opcode) -> Self {
        Instruction::Insn { opcode }
    }

    pub fn type_insn(opcode: Opcode, type_name: impl Into<String>) -> Self {
        Instruction::TypeInsn {
            opcode,
            type_name: type_name.into(),
        }
    }

    pub fn method(
        opcode: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Instruction::MethodInsn {
            opcode,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            is_interface: opcode == Opcode::Invokeinterface,
        }
    }

    pub fn invoke_static(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self::method(Opcode::Invokestatic, owner, name, descriptor)
    }

    /// The label this instruction marks, if it is a label.
    pub fn as_label(&self) -> Option<Label> {
        match self {
            Instruction::Label { label } => Some(*label),
            _ => None,
        }
    }

    /// Labels and try/catch declarations are positional: anything emitted for
    /// them must come after them.
    pub fn is_positional(&self) -> bool {
        matches!(
            self,
            Instruction::Label { .. } | Instruction::TryCatchBlock { .. }
        )
    }
}

// =============================================================================
// Class file
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

impl FieldDef {
    pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub fn is_enum_constant(&self) -> bool {
        self.access & ACC_ENUM != 0 && self.is_static()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl MethodDef {
    pub fn new(
        access: u16,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        instructions: Vec<Instruction>,
    ) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            instructions,
        }
    }

    /// A method implemented by the runtime rather than by bytecode.
    pub fn native(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::new(access | ACC_NATIVE, name, descriptor, Vec::new())
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

    /// Try blocks declared by this method, in declaration order.
    pub fn try_blocks(&self) -> impl Iterator<Item = &TryBlock> {
        self.instructions.iter().filter_map(|insn| match insn {
            Instruction::TryCatchBlock { block } => Some(block),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
    pub access: u16,
    /// Internal name.
    pub name: String,
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            access: ACC_PUBLIC | ACC_SUPER,
            name: name.into(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub fn is_enum(&self) -> bool {
        self.access & ACC_ENUM != 0
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Names of the enum constants, in declaration order.
    pub fn enum_constant_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_enum_constant())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// SHA-256 (hex) of the canonical JSON encoding.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

// =============================================================================
// Code builder
// =============================================================================

/// Assembles an instruction stream, allocating method-local labels.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<Instruction>,
    next_label: u32,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn push(&mut self, insn: Instruction) -> &mut Self {
        self.instructions.push(insn);
        self
    }

    pub fn label(&mut self, label: Label) -> &mut Self {
        self.push(Instruction::Label { label })
    }

    pub fn insn(&mut self, opcode: Opcode) -> &mut Self {
        self.push(Instruction::insn(opcode))
    }

    pub fn int_insn(&mut self, opcode: Opcode, operand: i32) -> &mut Self {
        self.push(Instruction::IntInsn { opcode, operand })
    }

    pub fn var(&mut self, opcode: Opcode, var: u16) -> &mut Self {
        self.push(Instruction::VarInsn { opcode, var })
    }

    pub fn iinc(&mut self, var: u16, increment: i32) -> &mut Self {
        self.push(Instruction::Iinc { var, increment })
    }

    pub fn type_insn(&mut self, opcode: Opcode, type_name: &str) -> &mut Self {
        self.push(Instruction::type_insn(opcode, type_name))
    }

    pub fn field(&mut self, opcode: Opcode, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.push(Instruction::FieldInsn {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    pub fn invoke(&mut self, opcode: Opcode, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.push(Instruction::method(opcode, owner, name, descriptor))
    }

    pub fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.push(Instruction::JumpInsn { opcode, label })
    }

    pub fn ldc(&mut self, constant: Constant) -> &mut Self {
        self.push(Instruction::Ldc { constant })
    }

    pub fn ldc_string(&mut self, value: &str) -> &mut Self {
        self.ldc(Constant::String(value.to_string()))
    }

    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, exception_type: &str) -> &mut Self {
        self.push(Instruction::TryCatchBlock {
            block: TryBlock {
                start,
                end,
                handler,
                kind: TryBlockKind::Catch {
                    exception_type: exception_type.to_string(),
                },
            },
        })
    }

    pub fn try_finally(&mut self, start: Label, end: Label, handler: Label) -> &mut Self {
        self.push(Instruction::TryCatchBlock {
            block: TryBlock {
                start,
                end,
                handler,
                kind: TryBlockKind::Finally { is_monitor: false },
            },
        })
    }

    pub fn line(&mut self, line: u32, label: Label) -> &mut Self {
        self.push(Instruction::LineNumber { line, label })
    }

    pub fn build(&mut self) -> Vec<Instruction> {
        std::mem::take(&mut self.instructions)
    }
}
