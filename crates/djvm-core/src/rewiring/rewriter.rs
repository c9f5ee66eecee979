//! Rewrites host classes into sandbox classes.
//!
//! For each method body the standard emitter chain runs first, on the original
//! names, and the remapper then relocates everything, emitted instructions
//! included. The output depends only on the input class and the
//! configuration, so rewriting many classes in parallel is safe.

use super::remapper::ClassRemapper;
use crate::config::AnalysisConfiguration;
use crate::emitters::EmitterChain;
use crate::errors::TransformError;
use djvm_types::bytecode::{ClassFile, MethodDef};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ClassRewriter {
    config: Arc<AnalysisConfiguration>,
    remapper: ClassRemapper,
}

impl ClassRewriter {
    pub fn new(config: Arc<AnalysisConfiguration>) -> Self {
        Self {
            remapper: ClassRemapper::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &Arc<AnalysisConfiguration> {
        &self.config
    }

    pub fn rewrite(&self, class: &ClassFile) -> Result<ClassFile, TransformError> {
        let mut chain = EmitterChain::standard(self.config.clone());
        let methods = class
            .methods
            .iter()
            .map(|method| {
                let instructions = if method.instructions.is_empty() {
                    Vec::new()
                } else {
                    chain
                        .process_method(&class.name, method)
                        .map_err(|source| TransformError::InMethod {
                            class: class.name.clone(),
                            method: method.name.clone(),
                            descriptor: method.descriptor.clone(),
                            source: Box::new(source),
                        })?
                };
                Ok(MethodDef {
                    instructions,
                    ..method.clone()
                })
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        let instrumented = ClassFile {
            methods,
            ..class.clone()
        };
        let rewritten = self.remapper.remap_class(&instrumented)?;
        debug!(class = %class.name, sandbox = %rewritten.name, "rewrote class");
        Ok(rewritten)
    }

    /// Rewrite independent classes in parallel. Results keep input order.
    pub fn rewrite_all(&self, classes: &[ClassFile]) -> Vec<Result<ClassFile, TransformError>> {
        classes.par_iter().map(|class| self.rewrite(class)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djvm_types::bytecode::{CodeBuilder, Instruction, Opcode, ACC_PUBLIC};

    fn rewriter() -> ClassRewriter {
        ClassRewriter::new(Arc::new(AnalysisConfiguration::default()))
    }

    fn catching_class(name: &str, catch_type: &str) -> ClassFile {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
        code.try_catch(start, end, handler, catch_type)
            .label(start)
            .ldc_string("boom")
            .insn(Opcode::Areturn)
            .label(end)
            .label(handler)
            .insn(Opcode::Athrow);
        ClassFile::new(name, Some("java/lang/Object")).with_method(MethodDef::new(
            ACC_PUBLIC,
            "run",
            "()Ljava/lang/String;",
            code.build(),
        ))
    }

    #[test]
    fn test_handler_is_instrumented_then_relocated() {
        let rewritten = rewriter()
            .rewrite(&catching_class("com/example/Foo", "com/example/MyException"))
            .unwrap();
        let method = &rewritten.methods[0];
        assert_eq!(method.descriptor, "()Lsandbox/java/lang/String;");

        let block = method.try_blocks().next().unwrap();
        assert_eq!(
            block.exception_type(),
            Some("sandbox/com/example/MyException$1DJVM")
        );
        let at = method
            .instructions
            .iter()
            .position(|i| i.as_label() == Some(block.handler))
            .unwrap();
        assert_eq!(
            &method.instructions[at + 1..],
            &[
                Instruction::invoke_static(
                    "sandbox/java/lang/DJVM",
                    "toDJVM",
                    "(Ljava/lang/Throwable;)Lsandbox/java/lang/Throwable;"
                ),
                Instruction::type_insn(Opcode::Checkcast, "sandbox/com/example/MyException"),
                Instruction::invoke_static(
                    "sandbox/java/lang/DJVM",
                    "fromDJVM",
                    "(Lsandbox/java/lang/Throwable;)Ljava/lang/Throwable;"
                ),
                Instruction::insn(Opcode::Athrow),
            ]
        );
    }

    #[test]
    fn test_string_conversion_survives_relocation() {
        let rewritten = rewriter()
            .rewrite(&catching_class("com/example/Foo", "java/lang/Exception"))
            .unwrap();
        assert!(rewritten.methods[0].instructions.contains(&Instruction::invoke_static(
            "sandbox/java/lang/String",
            "toDJVM",
            "(Ljava/lang/String;)Lsandbox/java/lang/String;"
        )));
    }

    #[test]
    fn test_rewrite_all_is_deterministic() {
        let classes: Vec<ClassFile> = (0..16)
            .map(|i| catching_class(&format!("com/example/C{}", i), "java/lang/Exception"))
            .collect();
        let rewriter = rewriter();
        let first: Vec<String> = rewriter
            .rewrite_all(&classes)
            .into_iter()
            .map(|r| r.unwrap().digest().unwrap())
            .collect();
        let sequential: Vec<String> = classes
            .iter()
            .map(|c| rewriter.rewrite(c).unwrap().digest().unwrap())
            .collect();
        assert_eq!(first, sequential);
        assert_eq!(first.len(), 16);
    }

    #[test]
    fn test_native_methods_pass_through() {
        let class = ClassFile::new("com/example/Tripwire", Some("java/lang/Object"))
            .with_method(MethodDef::native(ACC_PUBLIC, "trip", "(Ljava/lang/String;)V"));
        let rewritten = rewriter().rewrite(&class).unwrap();
        assert!(rewritten.methods[0].is_native());
        assert_eq!(rewritten.methods[0].descriptor, "(Lsandbox/java/lang/String;)V");
    }
}
