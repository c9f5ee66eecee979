//! Converts caught host throwables back into sandbox throwables.
//!
//! Every exception handler receives a host-world throwable. Right after the
//! handler's label this emitter inserts a call to `DJVM.toDJVM`, and for
//! typed catches a `CHECKCAST` to the declared type, which the remapper then
//! relocates to the sandbox type.

use super::{Emitter, EmitterContext, EMIT_HANDLING_EXCEPTIONS};
use crate::errors::TransformError;
use djvm_types::bytecode::{Instruction, Label, MethodDef, Opcode, TryBlockKind};
use std::collections::{HashMap, HashSet};
use tracing::trace;

#[derive(Debug, Default)]
pub struct HandleExceptionUnwrapper {
    /// Handler label -> declared type, empty for finally handlers.
    handlers: HashMap<Label, String>,
    visited: HashSet<Label>,
}

impl HandleExceptionUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, handler: Label, exception_type: &str) -> Result<(), TransformError> {
        if self.visited.contains(&handler) {
            return Err(TransformError::HandlerAfterLabel { label: handler });
        }
        match self.handlers.get(&handler) {
            Some(existing) if existing != exception_type => Err(TransformError::ConflictingHandler {
                label: handler,
                existing: existing.clone(),
                requested: exception_type.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.handlers.insert(handler, exception_type.to_string());
                Ok(())
            }
        }
    }
}

impl Emitter for HandleExceptionUnwrapper {
    fn name(&self) -> &'static str {
        "HandleExceptionUnwrapper"
    }

    fn priority(&self) -> i32 {
        EMIT_HANDLING_EXCEPTIONS
    }

    fn begin_method(&mut self, _method: &MethodDef) {
        self.handlers.clear();
        self.visited.clear();
    }

    fn emit(&mut self, ctx: &mut EmitterContext<'_>, insn: &Instruction) -> Result<(), TransformError> {
        match insn {
            Instruction::TryCatchBlock { block } => {
                let exception_type = match &block.kind {
                    TryBlockKind::Catch { exception_type } => exception_type.as_str(),
                    TryBlockKind::Finally { .. } => "",
                };
                self.register(block.handler, exception_type)
            }
            Instruction::Label { label } => {
                self.visited.insert(*label);
                if let Some(exception_type) = self.handlers.get(label) {
                    trace!(label = %label, exception_type = %exception_type, "unwrapping handler");
                    let names = ctx.names();
                    let (djvm, descriptor) = (names.djvm.clone(), names.to_djvm_descriptor.clone());
                    ctx.invoke_static(&djvm, "toDJVM", &descriptor);
                    if !exception_type.is_empty() {
                        ctx.type_insn(Opcode::Checkcast, exception_type);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfiguration;
    use crate::emitters::EmitterChain;
    use djvm_types::bytecode::{CodeBuilder, ACC_PUBLIC};
    use std::sync::Arc;

    fn chain() -> EmitterChain {
        EmitterChain::new(
            Arc::new(AnalysisConfiguration::default()),
            vec![Box::new(HandleExceptionUnwrapper::new())],
        )
    }

    fn to_djvm() -> Instruction {
        Instruction::invoke_static(
            "sandbox/java/lang/DJVM",
            "toDJVM",
            "(Ljava/lang/Throwable;)Lsandbox/java/lang/Throwable;",
        )
    }

    #[test]
    fn test_catch_handler_gets_conversion_and_cast() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.try_catch(start, end, handler, "com/example/MyException")
            .label(start)
            .insn(Opcode::Return)
            .label(end)
            .label(handler)
            .insn(Opcode::Athrow);
        let method = MethodDef::new(ACC_PUBLIC, "run", "()V", code.build());
        let out = chain().process_method("Foo", &method).unwrap();

        let at = out
            .iter()
            .position(|i| i.as_label() == Some(handler))
            .unwrap();
        assert_eq!(out[at + 1], to_djvm());
        assert_eq!(
            out[at + 2],
            Instruction::type_insn(Opcode::Checkcast, "com/example/MyException")
        );
        assert_eq!(out[at + 3], Instruction::insn(Opcode::Athrow));
        // Nothing emitted at non-handler labels.
        let start_at = out.iter().position(|i| i.as_label() == Some(start)).unwrap();
        assert_eq!(out[start_at + 1], Instruction::insn(Opcode::Return));
    }

    #[test]
    fn test_finally_handler_gets_conversion_only() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.try_finally(start, end, handler)
            .label(start)
            .label(end)
            .label(handler)
            .insn(Opcode::Athrow);
        let method = MethodDef::new(ACC_PUBLIC, "run", "()V", code.build());
        let out = chain().process_method("Foo", &method).unwrap();
        let at = out.iter().position(|i| i.as_label() == Some(handler)).unwrap();
        assert_eq!(out[at + 1], to_djvm());
        assert_eq!(out[at + 2], Instruction::insn(Opcode::Athrow));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut unwrapper = HandleExceptionUnwrapper::new();
        unwrapper.register(Label(4), "java/lang/Exception").unwrap();
        unwrapper.register(Label(4), "java/lang/Exception").unwrap();
        assert_eq!(
            unwrapper.register(Label(4), ""),
            Err(TransformError::ConflictingHandler {
                label: Label(4),
                existing: "java/lang/Exception".into(),
                requested: String::new(),
            })
        );
    }

    #[test]
    fn test_handler_declared_after_its_label() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.label(handler)
            .try_catch(start, end, handler, "java/lang/Exception")
            .label(start)
            .label(end)
            .insn(Opcode::Return);
        let method = MethodDef::new(ACC_PUBLIC, "run", "()V", code.build());
        assert_eq!(
            chain().process_method("Foo", &method),
            Err(TransformError::HandlerAfterLabel { label: handler })
        );
    }

    #[test]
    fn test_state_resets_between_methods() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.try_catch(start, end, handler, "java/lang/Exception")
            .label(start)
            .label(end)
            .label(handler)
            .insn(Opcode::Athrow);
        let first = MethodDef::new(ACC_PUBLIC, "first", "()V", code.build());

        // Same label numbers, different handler type: a new method, so no conflict.
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.try_finally(start, end, handler)
            .label(start)
            .label(end)
            .label(handler)
            .insn(Opcode::Athrow);
        let second = MethodDef::new(ACC_PUBLIC, "second", "()V", code.build());

        let mut chain = chain();
        chain.process_method("Foo", &first).unwrap();
        let out = chain.process_method("Foo", &second).unwrap();
        assert!(!out
            .iter()
            .any(|i| matches!(i, Instruction::TypeInsn { opcode: Opcode::Checkcast, .. })));
    }
}
