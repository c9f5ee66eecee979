//! Class fixtures shared by the integration tests.
//!
//! Every fixture is a host class, as a compiler would emit it. Tasks
//! implement `java/util/function/Function` and are run through
//! [`DeterministicSandboxExecutor`].

use djvm_core::config::{AnalysisConfiguration, ConfigError, SandboxConfiguration};
use djvm_core::executor::DeterministicSandboxExecutor;
use djvm_core::runtime::{InMemoryClassSource, NativeRegistry, ObjectRef, SandboxRuntime, Value};
use djvm_types::bytecode::{ClassFile, CodeBuilder, FieldDef, Instruction, MethodDef, Opcode};
use djvm_types::bytecode::{ACC_ENUM, ACC_FINAL, ACC_NATIVE, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
use parking_lot::Mutex;
use std::sync::Arc;

pub const FUNCTION: &str = "java/util/function/Function";
pub const APPLY: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";

pub const THROW_AND_CATCH: &str = "com/example/ThrowAndCatch";
pub const MY_BASE_EXCEPTION: &str = "com/example/MyBaseException";
pub const MY_EXAMPLE_EXCEPTION: &str = "com/example/MyExampleException";
pub const COLOR: &str = "com/example/Color";
pub const FAVOURITE_COLOR: &str = "com/example/FavouriteColor";
pub const ALL_COLORS: &str = "com/example/AllColors";
pub const ECHO: &str = "com/example/Echo";
pub const HALT: &str = "com/example/Halt";
pub const TRIPWIRE: &str = "com/example/Tripwire";
pub const TRIPWIRE_FINALLY: &str = "com/example/TripwireFinally";
pub const SPIN: &str = "com/example/Spin";
pub const RECURSE: &str = "com/example/Recurse";

const LIST: &str = "java/util/List";
const LIST_ADD: &str = "(Ljava/lang/Object;)Z";
const STRING_CTOR: &str = "(Ljava/lang/String;)V";

/// Binary name of an internal class name.
pub fn binary(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

fn constructor(super_name: &str) -> MethodDef {
    let mut code = CodeBuilder::new();
    code.var(Opcode::Aload, 0)
        .invoke(Opcode::Invokespecial, super_name, "<init>", "()V")
        .insn(Opcode::Return);
    MethodDef::new(ACC_PUBLIC, "<init>", "()V", code.build())
}

fn task(name: &str, apply: Vec<Instruction>) -> ClassFile {
    ClassFile::new(name, Some("java/lang/Object"))
        .with_access(ACC_PUBLIC | ACC_FINAL)
        .with_interface(FUNCTION)
        .with_method(constructor("java/lang/Object"))
        .with_method(MethodDef::new(ACC_PUBLIC, "apply", APPLY, apply))
}

fn exception(name: &str, super_name: &str) -> ClassFile {
    let mut init = CodeBuilder::new();
    init.var(Opcode::Aload, 0)
        .var(Opcode::Aload, 1)
        .invoke(Opcode::Invokespecial, super_name, "<init>", STRING_CTOR)
        .insn(Opcode::Return);
    ClassFile::new(name, Some(super_name))
        .with_access(ACC_PUBLIC)
        .with_method(MethodDef::new(ACC_PUBLIC, "<init>", STRING_CTOR, init.build()))
}

fn append(code: &mut CodeBuilder, list: u16, text: &str) {
    code.var(Opcode::Aload, list)
        .ldc_string(text)
        .invoke(Opcode::Invokeinterface, LIST, "add", LIST_ADD)
        .insn(Opcode::Pop);
}

/// ```text
/// val data = mutableListOf<String>()
/// try {
///     try { throw MyExampleException(input) } finally { data += "FIRST FINALLY" }
/// } catch (e: MyBaseException) {
///     data += "BASE EXCEPTION"; e.message?.apply { data += this }
/// } catch (e: Exception) {
///     data += "NOT THIS ONE!"
/// } finally {
///     data += "SECOND FINALLY"
/// }
/// return data.toTypedArray()
/// ```
pub fn throw_and_catch() -> ClassFile {
    let mut code = CodeBuilder::new();
    let outer_start = code.new_label();
    let inner_start = code.new_label();
    let inner_end = code.new_label();
    let inner_finally = code.new_label();
    let outer_end = code.new_label();
    let catch_base = code.new_label();
    let no_message = code.new_label();
    let catch_any = code.new_label();
    let catches_end = code.new_label();
    let outer_finally = code.new_label();
    let done = code.new_label();

    code.try_finally(inner_start, inner_end, inner_finally)
        .try_catch(outer_start, outer_end, catch_base, MY_BASE_EXCEPTION)
        .try_catch(outer_start, outer_end, catch_any, "java/lang/Exception")
        .try_finally(outer_start, catches_end, outer_finally)
        .type_insn(Opcode::New, "java/util/ArrayList")
        .insn(Opcode::Dup)
        .invoke(Opcode::Invokespecial, "java/util/ArrayList", "<init>", "()V")
        .var(Opcode::Astore, 2)
        .label(outer_start)
        .label(inner_start)
        .type_insn(Opcode::New, MY_EXAMPLE_EXCEPTION)
        .insn(Opcode::Dup)
        .var(Opcode::Aload, 1)
        .type_insn(Opcode::Checkcast, "java/lang/String")
        .invoke(Opcode::Invokespecial, MY_EXAMPLE_EXCEPTION, "<init>", STRING_CTOR)
        .insn(Opcode::Athrow)
        .label(inner_end)
        .label(inner_finally)
        .var(Opcode::Astore, 3);
    append(&mut code, 2, "FIRST FINALLY");
    code.var(Opcode::Aload, 3).insn(Opcode::Athrow).label(outer_end);

    code.label(catch_base).var(Opcode::Astore, 3);
    append(&mut code, 2, "BASE EXCEPTION");
    code.var(Opcode::Aload, 3)
        .invoke(Opcode::Invokevirtual, "java/lang/Throwable", "getMessage", "()Ljava/lang/String;")
        .var(Opcode::Astore, 4)
        .var(Opcode::Aload, 4)
        .jump(Opcode::Ifnull, no_message)
        .var(Opcode::Aload, 2)
        .var(Opcode::Aload, 4)
        .invoke(Opcode::Invokeinterface, LIST, "add", LIST_ADD)
        .insn(Opcode::Pop)
        .label(no_message)
        .jump(Opcode::Goto, done);

    code.label(catch_any).insn(Opcode::Pop);
    append(&mut code, 2, "NOT THIS ONE!");
    code.jump(Opcode::Goto, done).label(catches_end);

    code.label(outer_finally).var(Opcode::Astore, 3);
    append(&mut code, 2, "SECOND FINALLY");
    code.var(Opcode::Aload, 3).insn(Opcode::Athrow);

    code.label(done);
    append(&mut code, 2, "SECOND FINALLY");
    code.var(Opcode::Aload, 2)
        .insn(Opcode::Iconst0)
        .type_insn(Opcode::Anewarray, "java/lang/String")
        .invoke(
            Opcode::Invokeinterface,
            LIST,
            "toArray",
            "([Ljava/lang/Object;)[Ljava/lang/Object;",
        )
        .type_insn(Opcode::Checkcast, "[Ljava/lang/String;")
        .insn(Opcode::Areturn);

    task(THROW_AND_CATCH, code.build())
}

pub fn my_base_exception() -> ClassFile {
    exception(MY_BASE_EXCEPTION, "java/lang/Exception")
}

pub fn my_example_exception() -> ClassFile {
    exception(MY_EXAMPLE_EXCEPTION, MY_BASE_EXCEPTION)
}

/// `enum Color { RED, GREEN, BLUE }`
pub fn color() -> ClassFile {
    let descriptor = format!("L{};", COLOR);
    let constant = |name: &str| FieldDef::new(ACC_PUBLIC | ACC_STATIC | ACC_FINAL | ACC_ENUM, name, descriptor.as_str());
    ClassFile::new(COLOR, Some("java/lang/Enum"))
        .with_access(ACC_PUBLIC | ACC_FINAL | ACC_ENUM)
        .with_field(constant("RED"))
        .with_field(constant("GREEN"))
        .with_field(constant("BLUE"))
}

/// Returns `Color.BLUE`.
pub fn favourite_color() -> ClassFile {
    let mut code = CodeBuilder::new();
    code.field(Opcode::Getstatic, COLOR, "BLUE", &format!("L{};", COLOR))
        .insn(Opcode::Areturn);
    task(FAVOURITE_COLOR, code.build())
}

/// Returns `Color.values()`.
pub fn all_colors() -> ClassFile {
    let mut code = CodeBuilder::new();
    code.invoke(Opcode::Invokestatic, COLOR, "values", &format!("()[L{};", COLOR))
        .insn(Opcode::Areturn);
    task(ALL_COLORS, code.build())
}

/// Returns its input.
pub fn echo() -> ClassFile {
    let mut code = CodeBuilder::new();
    code.var(Opcode::Aload, 1).insn(Opcode::Areturn);
    task(ECHO, code.build())
}

/// A host fatal signal, pinned so sandboxed code sees the host class.
pub fn halt() -> ClassFile {
    ClassFile::new(HALT, Some("java/lang/ThreadDeath")).with_access(ACC_PUBLIC)
}

fn trip_method() -> MethodDef {
    MethodDef::native(ACC_PRIVATE | ACC_STATIC | ACC_NATIVE, "trip", "()V")
}

/// ```text
/// try { trip() } catch (t: Throwable) { return "caught" }
/// return "done"
/// ```
pub fn tripwire() -> ClassFile {
    let mut code = CodeBuilder::new();
    let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
    code.try_catch(start, end, handler, "java/lang/Throwable")
        .label(start)
        .invoke(Opcode::Invokestatic, TRIPWIRE, "trip", "()V")
        .label(end)
        .ldc_string("done")
        .insn(Opcode::Areturn)
        .label(handler)
        .insn(Opcode::Pop)
        .ldc_string("caught")
        .insn(Opcode::Areturn);
    task(TRIPWIRE, code.build()).with_method(trip_method())
}

/// ```text
/// try { trip() } finally { }
/// return "done"
/// ```
pub fn tripwire_finally() -> ClassFile {
    let mut code = CodeBuilder::new();
    let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
    code.try_finally(start, end, handler)
        .label(start)
        .invoke(Opcode::Invokestatic, TRIPWIRE_FINALLY, "trip", "()V")
        .label(end)
        .ldc_string("done")
        .insn(Opcode::Areturn)
        .label(handler)
        .insn(Opcode::Athrow);
    task(TRIPWIRE_FINALLY, code.build()).with_method(trip_method())
}

/// Loops forever.
pub fn spin() -> ClassFile {
    let mut code = CodeBuilder::new();
    let top = code.new_label();
    code.label(top).jump(Opcode::Goto, top);
    task(SPIN, code.build())
}

/// Calls itself without end, inside a `catch (Throwable)`.
pub fn recurse() -> ClassFile {
    let mut code = CodeBuilder::new();
    let (start, end, handler) = (code.new_label(), code.new_label(), code.new_label());
    code.try_catch(start, end, handler, "java/lang/Throwable")
        .label(start)
        .var(Opcode::Aload, 0)
        .var(Opcode::Aload, 1)
        .invoke(Opcode::Invokevirtual, RECURSE, "apply", APPLY)
        .insn(Opcode::Areturn)
        .label(end)
        .label(handler)
        .insn(Opcode::Areturn);
    task(RECURSE, code.build())
}

pub fn all_classes() -> Vec<ClassFile> {
    vec![
        throw_and_catch(),
        my_base_exception(),
        my_example_exception(),
        color(),
        favourite_color(),
        all_colors(),
        echo(),
        halt(),
        tripwire(),
        tripwire_finally(),
        spin(),
        recurse(),
    ]
}

pub fn source() -> Arc<InMemoryClassSource> {
    Arc::new(InMemoryClassSource::from_classes(all_classes()))
}

pub fn configuration() -> Result<SandboxConfiguration, ConfigError> {
    let analysis = AnalysisConfiguration::builder().with_pinned_class(HALT).build()?;
    Ok(SandboxConfiguration::new(analysis))
}

/// Natives for the tripwire tasks. Every `Halt` thrown is recorded in
/// `thrown`.
pub fn tripwire_natives(thrown: Arc<Mutex<Vec<ObjectRef>>>) -> NativeRegistry {
    let mut natives = NativeRegistry::new();
    for owner in [TRIPWIRE, TRIPWIRE_FINALLY] {
        let thrown = thrown.clone();
        let sandboxed = format!("sandbox/{}", owner);
        natives.register(&sandboxed, "trip", "()V", move |rt: &SandboxRuntime, _: &[Value]| {
            let halt = rt.new_host_throwable(HALT, Some("halt"))?;
            thrown.lock().push(halt.clone());
            Err(djvm_core::SandboxError::Thrown(halt))
        });
    }
    natives
}

pub fn executor(thrown: Arc<Mutex<Vec<ObjectRef>>>) -> Result<DeterministicSandboxExecutor, ConfigError> {
    Ok(DeterministicSandboxExecutor::new(configuration()?, source()).with_natives(tripwire_natives(thrown)))
}
