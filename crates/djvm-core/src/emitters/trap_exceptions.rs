//! Keeps fatal signals out of sandboxed catch blocks.
//!
//! A catch whose type stays a host type (`java/lang/Throwable`, a pinned
//! error, ...) could intercept a `ThreadDeath` signal. At such handlers this
//! emitter inserts `DJVM.checkCatch`, which rethrows the signal and otherwise
//! hands the throwable through unchanged.

use super::{Emitter, EmitterContext, EMIT_TRAPPING_EXCEPTIONS};
use crate::errors::TransformError;
use crate::exceptions::catches_host_type;
use djvm_types::bytecode::{Instruction, Label, MethodDef, TryBlockKind};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TrapFatalExceptions {
    host_typed_handlers: HashSet<Label>,
}

impl TrapFatalExceptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Emitter for TrapFatalExceptions {
    fn name(&self) -> &'static str {
        "TrapFatalExceptions"
    }

    fn priority(&self) -> i32 {
        EMIT_TRAPPING_EXCEPTIONS
    }

    fn begin_method(&mut self, _method: &MethodDef) {
        self.host_typed_handlers.clear();
    }

    fn emit(&mut self, ctx: &mut EmitterContext<'_>, insn: &Instruction) -> Result<(), TransformError> {
        match insn {
            Instruction::TryCatchBlock { block } => {
                if let TryBlockKind::Catch { exception_type } = &block.kind {
                    if catches_host_type(ctx.config(), exception_type) {
                        self.host_typed_handlers.insert(block.handler);
                    }
                }
            }
            Instruction::Label { label } if self.host_typed_handlers.contains(label) => {
                let names = ctx.names();
                let (djvm, descriptor) = (names.djvm.clone(), names.check_catch_descriptor.clone());
                ctx.invoke_static(&djvm, "checkCatch", &descriptor);
            }
            _ => {}
        }
        Ok(())
    }
}
