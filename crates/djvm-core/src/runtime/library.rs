//! The runtime library: classes every sandbox runtime provides itself.
//!
//! Method bodies are natives registered by
//! [`NativeRegistry::standard`](super::natives::NativeRegistry::standard).

use crate::config::AnalysisConfiguration;
use crate::well_known::{host, BOXED_CLASSES};
use djvm_types::bytecode::{
    ClassFile, MethodDef, ACC_ABSTRACT, ACC_FINAL, ACC_INTERFACE, ACC_PUBLIC, ACC_STATIC,
    CONSTRUCTOR_NAME,
};

const FUNCTION: &str = "java/util/function/Function";

/// Constructor descriptors of a throwable class whose string and throwable
/// types are `string` and `throwable`.
pub(crate) fn throwable_constructors(string: &str, throwable: &str) -> [String; 4] {
    [
        "()V".to_string(),
        format!("(L{};)V", string),
        format!("(L{};L{};)V", string, throwable),
        format!("(L{};)V", throwable),
    ]
}

fn native(name: &str, descriptor: &str) -> MethodDef {
    MethodDef::native(ACC_PUBLIC, name, descriptor)
}

fn static_native(name: &str, descriptor: &str) -> MethodDef {
    MethodDef::native(ACC_PUBLIC | ACC_STATIC, name, descriptor)
}

fn abstract_method(name: &str, descriptor: &str) -> MethodDef {
    MethodDef::new(ACC_PUBLIC | ACC_ABSTRACT, name, descriptor, Vec::new())
}

fn interface(name: &str) -> ClassFile {
    ClassFile::new(name, Some(host::OBJECT)).with_access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT)
}

/// One world's throwable hierarchy: every configured exception class with
/// its constructors, plus the accessors on the root.
fn throwable_classes(
    classes: &mut Vec<ClassFile>,
    exceptions: &[(String, String)],
    string: &str,
    throwable: &str,
) {
    for (name, super_name) in exceptions {
        let mut class = ClassFile::new(name.as_str(), Some(super_name.as_str()));
        for descriptor in throwable_constructors(string, throwable) {
            class = class.with_method(native(CONSTRUCTOR_NAME, &descriptor));
        }
        if name == throwable {
            class = class
                .with_method(native("getMessage", &format!("()L{};", string)))
                .with_method(native("getCause", &format!("()L{};", throwable)))
                .with_method(native("initCause", &format!("(L{};)L{};", throwable, throwable)));
        }
        classes.push(class);
    }
}

/// Every class of the runtime library, host and sandbox.
pub fn bootstrap_classes(config: &AnalysisConfiguration) -> Vec<ClassFile> {
    let namespace = config.namespace();
    let names = config.names();
    let mut classes = Vec::new();

    // Host world.
    classes.push(ClassFile::new(host::OBJECT, None).with_method(native(CONSTRUCTOR_NAME, "()V")));
    classes.push(
        ClassFile::new(host::STRING, Some(host::OBJECT))
            .with_access(ACC_PUBLIC | ACC_FINAL)
            .with_method(native("length", "()I")),
    );
    for boxed in BOXED_CLASSES {
        classes.push(ClassFile::new(*boxed, Some(host::OBJECT)).with_access(ACC_PUBLIC | ACC_FINAL));
    }
    classes.push(
        ClassFile::new(host::ENUM, Some(host::OBJECT))
            .with_access(ACC_PUBLIC | ACC_ABSTRACT)
            .with_method(native("name", &format!("()L{};", host::STRING)))
            .with_method(native("ordinal", "()I")),
    );
    let host_exceptions: Vec<(String, String)> = config
        .jvm_exceptions()
        .map(|(name, super_name)| (name.to_string(), super_name.to_string()))
        .collect();
    throwable_classes(&mut classes, &host_exceptions, host::STRING, host::THROWABLE);
    classes.push(
        ClassFile::new(host::THREAD_DEATH, Some(host::ERROR))
            .with_method(native(CONSTRUCTOR_NAME, "()V")),
    );
    for violation in [host::RULE_VIOLATION, host::THRESHOLD_VIOLATION] {
        classes.push(
            ClassFile::new(violation, Some(host::THREAD_DEATH))
                .with_method(native(CONSTRUCTOR_NAME, &format!("(L{};)V", host::STRING))),
        );
    }

    // Sandbox world.
    classes.push(
        ClassFile::new(&names.object, Some(host::OBJECT)).with_method(native(CONSTRUCTOR_NAME, "()V")),
    );
    classes.push(
        ClassFile::new(&names.string, Some(names.object.as_str()))
            .with_access(ACC_PUBLIC | ACC_FINAL)
            .with_method(static_native("toDJVM", &names.string_to_djvm_descriptor))
            .with_method(native("length", "()I")),
    );
    for boxed in BOXED_CLASSES {
        classes.push(
            ClassFile::new(&namespace.to_sandbox_internal(boxed), Some(names.object.as_str()))
                .with_access(ACC_PUBLIC | ACC_FINAL),
        );
    }
    classes.push(
        ClassFile::new(&names.enum_class, Some(names.object.as_str()))
            .with_access(ACC_PUBLIC | ACC_ABSTRACT)
            .with_method(native("name", &format!("()L{};", names.string)))
            .with_method(native("ordinal", "()I")),
    );
    let sandbox_exceptions: Vec<(String, String)> = config
        .jvm_exceptions()
        .map(|(name, super_name)| {
            (
                namespace.to_sandbox_internal(name),
                namespace.to_sandbox_internal(super_name),
            )
        })
        .collect();
    throwable_classes(&mut classes, &sandbox_exceptions, &names.string, &names.throwable);
    classes.push(ClassFile::new(&names.throwable_wrapper, Some(names.throwable.as_str())).with_access(ACC_PUBLIC | ACC_FINAL));
    classes.push(
        ClassFile::new(&names.djvm, Some(host::OBJECT))
            .with_access(ACC_PUBLIC | ACC_FINAL)
            .with_method(static_native("toDJVM", &names.to_djvm_descriptor))
            .with_method(static_native("fromDJVM", &names.from_djvm_descriptor))
            .with_method(static_native("checkCatch", &names.check_catch_descriptor)),
    );
    classes.push(interface(&names.djvm_exception));

    let object = format!("L{};", names.object);
    let object_array = format!("[{}", object);
    classes.push(
        interface(&names.list)
            .with_method(abstract_method("add", &format!("({})Z", object)))
            .with_method(abstract_method("size", "()I"))
            .with_method(abstract_method("get", &format!("(I){}", object)))
            .with_method(abstract_method("toArray", &format!("({}){}", object_array, object_array))),
    );
    classes.push(
        ClassFile::new(&names.array_list, Some(names.object.as_str()))
            .with_interface(names.list.clone())
            .with_method(native(CONSTRUCTOR_NAME, "()V"))
            .with_method(native("add", &format!("({})Z", object)))
            .with_method(native("size", "()I"))
            .with_method(native("get", &format!("(I){}", object)))
            .with_method(native("toArray", &format!("({}){}", object_array, object_array))),
    );
    classes.push(
        interface(&namespace.to_sandbox_internal(FUNCTION))
            .with_method(abstract_method("apply", &format!("({}){}", object, object))),
    );

    classes
}
