//! Relocating a class's references into the sandbox namespace.

use crate::config::AnalysisConfiguration;
use crate::errors::TransformError;
use crate::exceptions::{shadow_name_of, ExceptionResolver};
use crate::resolver::ClassResolver;
use djvm_types::bytecode::{ClassFile, Constant, FieldDef, Instruction, MethodDef, TryBlock, TryBlockKind};
use std::sync::Arc;
use tracing::trace;

/// How a member reference is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// Owner is pinned, template or whitelisted: owner, name and descriptor
    /// are kept byte-for-byte.
    PassThrough,
    /// Owner and descriptor are relocated.
    Remap,
}

impl Mapping {
    pub fn for_owner(config: &AnalysisConfiguration, owner: &str) -> Self {
        if config.is_exempt(owner) {
            Mapping::PassThrough
        } else {
            Mapping::Remap
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassRemapper {
    resolver: ClassResolver,
    exceptions: ExceptionResolver,
}

impl ClassRemapper {
    pub fn new(config: Arc<AnalysisConfiguration>) -> Self {
        Self {
            resolver: ClassResolver::new(config.clone()),
            exceptions: ExceptionResolver::new(config),
        }
    }

    pub fn resolver(&self) -> &ClassResolver {
        &self.resolver
    }

    /// Relocate the header, fields and method signatures of `class`, and every
    /// instruction of every method body.
    pub fn remap_class(&self, class: &ClassFile) -> Result<ClassFile, TransformError> {
        let fields = class
            .fields
            .iter()
            .map(|field| {
                Ok(FieldDef {
                    access: field.access,
                    name: field.name.clone(),
                    descriptor: self.resolver.resolve_descriptor(&field.descriptor)?,
                })
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        let methods = class
            .methods
            .iter()
            .map(|method| {
                self.remap_method(method)
                    .map_err(|source| TransformError::InMethod {
                        class: class.name.clone(),
                        method: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                        source: Box::new(source),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ClassFile {
            access: class.access,
            name: self.resolver.resolve(&class.name),
            super_name: class.super_name.as_deref().map(|s| self.resolver.resolve(s)),
            interfaces: class
                .interfaces
                .iter()
                .map(|i| self.resolver.resolve(i))
                .collect(),
            fields,
            methods,
        })
    }

    pub fn remap_method(&self, method: &MethodDef) -> Result<MethodDef, TransformError> {
        Ok(MethodDef {
            access: method.access,
            name: method.name.clone(),
            descriptor: self.resolver.resolve_method_descriptor(&method.descriptor)?,
            instructions: method
                .instructions
                .iter()
                .map(|insn| self.remap_instruction(insn))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn remap_instruction(&self, insn: &Instruction) -> Result<Instruction, TransformError> {
        let config = self.resolver.config();
        Ok(match insn {
            Instruction::TypeInsn { opcode, type_name } => Instruction::TypeInsn {
                opcode: *opcode,
                type_name: self.resolver.resolve_type(type_name)?,
            },
            Instruction::FieldInsn {
                opcode,
                owner,
                name,
                descriptor,
            } => match Mapping::for_owner(config, owner) {
                Mapping::PassThrough => insn.clone(),
                Mapping::Remap => Instruction::FieldInsn {
                    opcode: *opcode,
                    owner: self.resolver.resolve_type(owner)?,
                    name: name.clone(),
                    descriptor: self.resolver.resolve_descriptor(descriptor)?,
                },
            },
            Instruction::MethodInsn {
                opcode,
                owner,
                name,
                descriptor,
                is_interface,
            } => match Mapping::for_owner(config, owner) {
                Mapping::PassThrough => {
                    trace!(owner = %owner, name = %name, "pass-through reference");
                    insn.clone()
                }
                Mapping::Remap => Instruction::MethodInsn {
                    opcode: *opcode,
                    owner: self.resolver.resolve_type(owner)?,
                    name: name.clone(),
                    descriptor: self.resolver.resolve_method_descriptor(descriptor)?,
                    is_interface: *is_interface,
                },
            },
            Instruction::Ldc {
                constant: Constant::Type(type_name),
            } => Instruction::Ldc {
                constant: Constant::Type(self.resolver.resolve_type(type_name)?),
            },
            Instruction::TryCatchBlock { block } => Instruction::TryCatchBlock {
                block: self.remap_try_block(block),
            },
            other => other.clone(),
        })
    }

    /// Catch types that stay host types are kept; every other catch is
    /// retyped to the shadow of the relocated type. Finally handlers have no
    /// type and are never touched.
    pub fn remap_try_block(&self, block: &TryBlock) -> TryBlock {
        match &block.kind {
            TryBlockKind::Catch { exception_type } if !self.exceptions.catches_host_type(exception_type) => {
                TryBlock {
                    kind: TryBlockKind::Catch {
                        exception_type: shadow_name_of(&self.resolver.resolve(exception_type)),
                    },
                    ..block.clone()
                }
            }
            _ => block.clone(),
        }
    }
}
