//! Wraps string constants in sandbox strings.

use super::{Emitter, EmitterContext};
use crate::errors::TransformError;
use djvm_types::bytecode::{Constant, Instruction};

/// After every `LDC` of a string constant, converts the host string on the
/// stack with `<ns>/java/lang/String.toDJVM`.
#[derive(Debug, Default)]
pub struct StringConstantWrapper;

impl Emitter for StringConstantWrapper {
    fn name(&self) -> &'static str {
        "StringConstantWrapper"
    }

    fn emit(&mut self, ctx: &mut EmitterContext<'_>, insn: &Instruction) -> Result<(), TransformError> {
        if let Instruction::Ldc {
            constant: Constant::String(_),
        } = insn
        {
            let names = ctx.names();
            let (string, descriptor) = (names.string.clone(), names.string_to_djvm_descriptor.clone());
            // Emitted after the constant: the conversion consumes it.
            ctx.emit(insn.clone());
            ctx.invoke_static(&string, "toDJVM", &descriptor);
            ctx.prevent_default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfiguration;
    use crate::emitters::EmitterChain;
    use djvm_types::bytecode::{CodeBuilder, MethodDef, Opcode, ACC_PUBLIC};
    use std::sync::Arc;

    #[test]
    fn test_string_constants_are_converted() {
        let mut code = CodeBuilder::new();
        code.ldc_string("Hello")
            .ldc(Constant::Int(7))
            .insn(Opcode::Areturn);
        let method = MethodDef::new(ACC_PUBLIC, "run", "()Ljava/lang/String;", code.build());
        let mut chain = EmitterChain::new(
            Arc::new(AnalysisConfiguration::default()),
            vec![Box::new(StringConstantWrapper)],
        );
        let out = chain.process_method("Foo", &method).unwrap();
        assert_eq!(
            out,
            vec![
                Instruction::Ldc {
                    constant: Constant::String("Hello".into())
                },
                Instruction::invoke_static(
                    "sandbox/java/lang/String",
                    "toDJVM",
                    "(Ljava/lang/String;)Lsandbox/java/lang/String;"
                ),
                Instruction::Ldc {
                    constant: Constant::Int(7)
                },
                Instruction::insn(Opcode::Areturn),
            ]
        );
    }
}
