//! Shared types for the djvm workspace.
//!
//! - [`names`]: binary/internal class-name spellings and the sandbox [`Namespace`]
//! - [`descriptor`]: field and method descriptor parsing and remapping
//! - [`bytecode`]: the class/method/instruction model the rewriter works on

pub mod bytecode;
pub mod descriptor;
pub mod names;

pub use bytecode::{ClassFile, CodeBuilder, Constant, FieldDef, Instruction, Label, MethodDef, Opcode, TryBlock, TryBlockKind};
pub use descriptor::{DescriptorError, FieldType, MethodDescriptor};
pub use names::{Namespace, NamespaceError};
