//! Converts sandbox throwables to host throwables before they are thrown.

use super::{Emitter, EmitterContext};
use crate::errors::TransformError;
use djvm_types::bytecode::{Instruction, Opcode};

/// Before every `ATHROW`, replaces the sandbox throwable on the stack with
/// `DJVM.fromDJVM(...)`, so the object actually thrown is always a shadow or a
/// recognised host exception.
#[derive(Debug, Default)]
pub struct ThrowExceptionWrapper;

impl Emitter for ThrowExceptionWrapper {
    fn name(&self) -> &'static str {
        "ThrowExceptionWrapper"
    }

    fn emit(&mut self, ctx: &mut EmitterContext<'_>, insn: &Instruction) -> Result<(), TransformError> {
        if matches!(insn, Instruction::Insn { opcode: Opcode::Athrow }) {
            let names = ctx.names();
            let (djvm, descriptor) = (names.djvm.clone(), names.from_djvm_descriptor.clone());
            ctx.invoke_static(&djvm, "fromDJVM", &descriptor);
        }
        Ok(())
    }
}
