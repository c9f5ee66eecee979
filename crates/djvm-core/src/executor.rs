//! One-shot execution of a sandboxed task.
//!
//! A task is any class with a no-argument constructor and a one-argument
//! instance method called `apply`, in the shape of
//! `java.util.function.Function`. Every run gets a fresh [`SandboxRuntime`],
//! so no state leaks from one run into the next.

use crate::config::SandboxConfiguration;
use crate::errors::SandboxError;
use crate::runtime::{ClassSource, HostValue, NativeRegistry, SandboxRuntime, Value};
use djvm_types::bytecode::CONSTRUCTOR_NAME;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const TASK_METHOD: &str = "apply";

/// How a task finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Returned(HostValue),
    /// The task let a throwable escape. Shadow exceptions are reported as
    /// the class they stand for.
    Threw(HostValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Binary name of the task class, as requested.
    pub class_name: String,
    pub outcome: Outcome,
    pub instructions_executed: u64,
    pub classes_loaded: usize,
}

pub struct DeterministicSandboxExecutor {
    config: SandboxConfiguration,
    source: Arc<dyn ClassSource>,
    natives: NativeRegistry,
}

impl DeterministicSandboxExecutor {
    pub fn new(config: SandboxConfiguration, source: Arc<dyn ClassSource>) -> Self {
        Self {
            config,
            source,
            natives: NativeRegistry::new(),
        }
    }

    /// Builder method: natives available to every run, on top of the
    /// standard ones.
    pub fn with_natives(mut self, natives: NativeRegistry) -> Self {
        self.natives = natives;
        self
    }

    pub fn config(&self) -> &SandboxConfiguration {
        &self.config
    }

    /// A fresh runtime configured like the ones [`run`](Self::run) uses.
    pub fn new_runtime(&self) -> Result<SandboxRuntime, SandboxError> {
        SandboxRuntime::with_natives(self.config.clone(), self.source.clone(), &self.natives)
    }

    /// Run the task `class_name` (a binary name) on `input`.
    ///
    /// A throwable escaping the task is an [`Outcome::Threw`]; errors that
    /// sandboxed code cannot catch (rule violations, exhausted limits,
    /// unresolvable classes) are returned as `Err`.
    pub fn run(&self, class_name: &str, input: &HostValue) -> Result<ExecutionSummary, SandboxError> {
        let rt = self.new_runtime()?;
        let outcome = match Self::invoke_task(&rt, class_name, input) {
            Ok(value) => Outcome::Returned(value),
            Err(SandboxError::Thrown(throwable)) => Outcome::Threw(rt.to_host_value(&Value::Ref(throwable))?),
            Err(err) => {
                debug!(class = %class_name, error = %err, "task aborted");
                return Err(err);
            }
        };
        let summary = ExecutionSummary {
            class_name: class_name.to_string(),
            outcome,
            instructions_executed: rt.instructions_executed(),
            classes_loaded: rt.loader().loaded_count(),
        };
        info!(
            class = %class_name,
            instructions = summary.instructions_executed,
            classes = summary.classes_loaded,
            "task finished"
        );
        Ok(summary)
    }

    fn invoke_task(rt: &SandboxRuntime, class_name: &str, input: &HostValue) -> Result<HostValue, SandboxError> {
        let class = rt.class_for_name(class_name)?;
        let method = class
            .resolve_by_arity(TASK_METHOD, 1)
            .ok_or_else(|| SandboxError::NoSuchMethod {
                owner: class.name().to_string(),
                name: TASK_METHOD.to_string(),
                descriptor: "(1 argument)".to_string(),
            })?;

        let task = rt.new_object(&class)?;
        rt.invoke_special(class.name(), CONSTRUCTOR_NAME, "()V", vec![Value::Ref(task.clone())])?;

        let argument = rt.sandbox(&rt.to_host_object(input)?)?;
        let result = rt
            .invoke_method(&method, vec![Value::Ref(task), argument])?
            .unwrap_or(Value::Null);
        rt.to_host_value(&rt.unsandbox(&result)?)
    }
}

impl std::fmt::Debug for DeterministicSandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicSandboxExecutor")
            .field("config", &self.config)
            .field("natives", &self.natives.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionLimits;
    use crate::runtime::InMemoryClassSource;
    use djvm_types::bytecode::{ClassFile, CodeBuilder, MethodDef, Opcode, ACC_PUBLIC};

    const FUNCTION: &str = "java/util/function/Function";
    const APPLY: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";

    fn constructor() -> MethodDef {
        let mut code = CodeBuilder::new();
        code.var(Opcode::Aload, 0)
            .invoke(Opcode::Invokespecial, "java/lang/Object", "<init>", "()V")
            .insn(Opcode::Return);
        MethodDef::new(ACC_PUBLIC, "<init>", "()V", code.build())
    }

    fn task(name: &str, apply: Vec<djvm_types::bytecode::Instruction>) -> ClassFile {
        ClassFile::new(name, Some("java/lang/Object"))
            .with_interface(FUNCTION)
            .with_method(constructor())
            .with_method(MethodDef::new(ACC_PUBLIC, "apply", APPLY, apply))
    }

    fn source() -> Arc<InMemoryClassSource> {
        let mut echo = CodeBuilder::new();
        echo.var(Opcode::Aload, 1).insn(Opcode::Areturn);

        let mut refuse = CodeBuilder::new();
        refuse
            .type_insn(Opcode::New, "java/lang/IllegalStateException")
            .insn(Opcode::Dup)
            .ldc_string("nope")
            .invoke(
                Opcode::Invokespecial,
                "java/lang/IllegalStateException",
                "<init>",
                "(Ljava/lang/String;)V",
            )
            .insn(Opcode::Athrow);

        let mut spin = CodeBuilder::new();
        let top = spin.new_label();
        spin.label(top).jump(Opcode::Goto, top);

        Arc::new(InMemoryClassSource::from_classes(vec![
            task("com/example/Echo", echo.build()),
            task("com/example/Refuse", refuse.build()),
            task("com/example/Spin", spin.build()),
        ]))
    }

    #[test]
    fn test_returned_value_is_unsandboxed() {
        let executor = DeterministicSandboxExecutor::new(SandboxConfiguration::default(), source());
        let summary = executor.run("com.example.Echo", &HostValue::string("hi")).unwrap();
        assert_eq!(summary.outcome, Outcome::Returned(HostValue::string("hi")));
        assert_eq!(summary.class_name, "com.example.Echo");
        assert!(summary.instructions_executed > 0);
        assert!(summary.classes_loaded > 0);
    }

    #[test]
    fn test_thrown_exception_is_reported() {
        let executor = DeterministicSandboxExecutor::new(SandboxConfiguration::default(), source());
        let summary = executor.run("com.example.Refuse", &HostValue::Null).unwrap();
        assert_eq!(
            summary.outcome,
            Outcome::Threw(HostValue::Throwable {
                class: "java/lang/IllegalStateException".into(),
                message: Some("nope".into()),
            })
        );
    }

    #[test]
    fn test_runaway_task_is_stopped() {
        let config = SandboxConfiguration::default().with_limits(ExecutionLimits {
            max_instructions: 1_000,
            ..Default::default()
        });
        let executor = DeterministicSandboxExecutor::new(config, source());
        let err = executor.run("com.example.Spin", &HostValue::Null).unwrap_err();
        assert!(matches!(err, SandboxError::ThresholdExceeded(_)));
    }

    #[test]
    fn test_missing_task_class() {
        let executor = DeterministicSandboxExecutor::new(SandboxConfiguration::default(), source());
        let err = executor.run("com.example.Missing", &HostValue::Null).unwrap_err();
        assert!(matches!(err, SandboxError::ClassNotFound(_)));
    }

    #[test]
    fn test_runs_are_independent() {
        let executor = DeterministicSandboxExecutor::new(SandboxConfiguration::default(), source());
        let first = executor.run("com.example.Echo", &HostValue::Int(7)).unwrap();
        let second = executor.run("com.example.Echo", &HostValue::Int(7)).unwrap();
        assert_eq!(first, second);
    }
}
