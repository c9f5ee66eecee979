//! Instruction emitters.
//!
//! An [`Emitter`] sees every instruction of a method in order and may add
//! instructions around it. Emitters run in ascending [`Emitter::priority`]; for
//! the same instruction, a lower priority emits first.
//!
//! Labels and try/catch declarations are positional, so instructions emitted
//! for them are placed after them. For every other instruction they are
//! placed before it, and an emitter may drop the instruction itself with
//! [`EmitterContext::prevent_default`].
//!
//! Emitters work on pre-rewrite names; the class remapper runs afterwards and
//! relocates whatever they emit.

pub mod string_constants;
pub mod throw_exceptions;
pub mod trap_exceptions;
pub mod unwrap_exceptions;

use crate::config::{AnalysisConfiguration, BridgeNames};
use crate::errors::TransformError;
use djvm_types::bytecode::{Instruction, MethodDef, Opcode};
use smallvec::SmallVec;
use std::sync::Arc;

pub use string_constants::StringConstantWrapper;
pub use throw_exceptions::ThrowExceptionWrapper;
pub use trap_exceptions::TrapFatalExceptions;
pub use unwrap_exceptions::HandleExceptionUnwrapper;

pub const EMIT_TRACING: i32 = 0;
pub const EMIT_TRAPPING_EXCEPTIONS: i32 = EMIT_TRACING + 1;
pub const EMIT_HANDLING_EXCEPTIONS: i32 = EMIT_TRAPPING_EXCEPTIONS + 1;
pub const EMIT_DEFAULT: i32 = 10;

pub trait Emitter: Send {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        EMIT_DEFAULT
    }

    /// Called before the first instruction of each method. Labels are
    /// method-scoped, so per-method state must be reset here.
    fn begin_method(&mut self, _method: &MethodDef) {}

    fn emit(&mut self, ctx: &mut EmitterContext<'_>, insn: &Instruction) -> Result<(), TransformError>;
}

/// Collects what the emitters produce for one instruction.
pub struct EmitterContext<'a> {
    config: &'a AnalysisConfiguration,
    class_name: &'a str,
    emitted: SmallVec<[Instruction; 4]>,
    prevent_default: bool,
}

impl<'a> EmitterContext<'a> {
    fn new(config: &'a AnalysisConfiguration, class_name: &'a str) -> Self {
        Self {
            config,
            class_name,
            emitted: SmallVec::new(),
            prevent_default: false,
        }
    }

    pub fn config(&self) -> &AnalysisConfiguration {
        self.config
    }

    pub fn names(&self) -> &BridgeNames {
        self.config.names()
    }

    /// The (pre-rewrite) name of the class being processed.
    pub fn class_name(&self) -> &str {
        self.class_name
    }

    pub fn emit(&mut self, insn: Instruction) {
        self.emitted.push(insn);
    }

    pub fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) {
        self.emit(Instruction::invoke_static(owner, name, descriptor));
    }

    pub fn type_insn(&mut self, opcode: Opcode, type_name: &str) {
        self.emit(Instruction::type_insn(opcode, type_name));
    }

    /// Drop the instruction being visited.
    pub fn prevent_default(&mut self) {
        self.prevent_default = true;
    }

    pub fn is_default_prevented(&self) -> bool {
        self.prevent_default
    }
}

/// Emitters for one class, sorted by priority.
pub struct EmitterChain {
    config: Arc<AnalysisConfiguration>,
    emitters: Vec<Box<dyn Emitter>>,
}

impl EmitterChain {
    pub fn new(config: Arc<AnalysisConfiguration>, mut emitters: Vec<Box<dyn Emitter>>) -> Self {
        // Stable: equal priorities keep registration order.
        emitters.sort_by_key(|e| e.priority());
        Self { config, emitters }
    }

    /// The standard pipeline. A fresh chain is built for every class.
    pub fn standard(config: Arc<AnalysisConfiguration>) -> Self {
        Self::new(
            config,
            vec![
                Box::new(TrapFatalExceptions::new()),
                Box::new(HandleExceptionUnwrapper::new()),
                Box::new(StringConstantWrapper),
                Box::new(ThrowExceptionWrapper),
            ],
        )
    }

    pub fn emitter_names(&self) -> Vec<&'static str> {
        self.emitters.iter().map(|e| e.name()).collect()
    }

    /// Run every emitter over one method body and return the new body.
    pub fn process_method(
        &mut self,
        class_name: &str,
        method: &MethodDef,
    ) -> Result<Vec<Instruction>, TransformError> {
        for emitter in &mut self.emitters {
            emitter.begin_method(method);
        }

        let mut output = Vec::with_capacity(method.instructions.len());
        for insn in &method.instructions {
            let mut ctx = EmitterContext::new(&self.config, class_name);
            for emitter in &mut self.emitters {
                emitter.emit(&mut ctx, insn)?;
            }
            let keep = !ctx.prevent_default;
            if insn.is_positional() {
                if keep {
                    output.push(insn.clone());
                }
                output.extend(ctx.emitted);
            } else {
                output.extend(ctx.emitted);
                if keep {
                    output.push(insn.clone());
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djvm_types::bytecode::{CodeBuilder, Label, ACC_PUBLIC};

    struct Marker {
        name: &'static str,
        priority: i32,
        drop_returns: bool,
    }

    impl Emitter for Marker {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn emit(&mut self, ctx: &mut EmitterContext<'_>, insn: &Instruction) -> Result<(), TransformError> {
            match insn {
                Instruction::Label { .. } | Instruction::Insn { .. } => {
                    ctx.invoke_static("Marker", self.name, "()V");
                    if self.drop_returns && matches!(insn, Instruction::Insn { opcode: Opcode::Return }) {
                        ctx.prevent_default();
                    }
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn marker(name: &'static str, priority: i32) -> Box<dyn Emitter> {
        Box::new(Marker {
            name,
            priority,
            drop_returns: false,
        })
    }

    fn method() -> MethodDef {
        let mut code = CodeBuilder::new();
        let label = code.new_label();
        code.label(label).insn(Opcode::Return);
        MethodDef::new(ACC_PUBLIC, "run", "()V", code.build())
    }

    #[test]
    fn test_priority_order_and_placement() {
        let config = Arc::new(AnalysisConfiguration::default());
        let mut chain = EmitterChain::new(config, vec![marker("late", 5), marker("early", 1)]);
        assert_eq!(chain.emitter_names(), vec!["early", "late"]);

        let out = chain.process_method("Foo", &method()).unwrap();
        assert_eq!(
            out,
            vec![
                Instruction::Label { label: Label(0) },
                Instruction::invoke_static("Marker", "early", "()V"),
                Instruction::invoke_static("Marker", "late", "()V"),
                Instruction::invoke_static("Marker", "early", "()V"),
                Instruction::invoke_static("Marker", "late", "()V"),
                Instruction::insn(Opcode::Return),
            ]
        );
    }

    #[test]
    fn test_prevent_default_replaces_instruction() {
        let config = Arc::new(AnalysisConfiguration::default());
        let mut chain = EmitterChain::new(
            config,
            vec![Box::new(Marker {
                name: "swap",
                priority: EMIT_DEFAULT,
                drop_returns: true,
            })],
        );
        let out = chain.process_method("Foo", &method()).unwrap();
        assert_eq!(out.last(), Some(&Instruction::invoke_static("Marker", "swap", "()V")));
        assert!(!out.contains(&Instruction::insn(Opcode::Return)));
    }

    #[test]
    fn test_standard_chain_order() {
        let chain = EmitterChain::standard(Arc::new(AnalysisConfiguration::default()));
        assert_eq!(
            chain.emitter_names(),
            vec![
                "TrapFatalExceptions",
                "HandleExceptionUnwrapper",
                "StringConstantWrapper",
                "ThrowExceptionWrapper"
            ]
        );
    }
}
