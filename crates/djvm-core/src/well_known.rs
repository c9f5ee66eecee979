//! Well-known class names, suffixes and defaults.
//!
//! Host names are internal names in the host world. Names in [`sandbox`] are
//! relative to the sandbox namespace and must be prefixed with
//! [`djvm_types::Namespace::to_sandbox_internal`] before use.

/// Suffix appended to a sandbox exception class to name its shadow.
pub const SHADOW_SUFFIX: &str = "$1DJVM";

/// Names of the runtime-owned named caches.
pub mod caches {
    pub const ENUM_CONSTANTS: &str = "DJVM_enumConstants";
    pub const ENUM_DIRECTORIES: &str = "DJVM_enumDirectories";
}

/// Host-world classes.
pub mod host {
    pub const OBJECT: &str = "java/lang/Object";
    pub const STRING: &str = "java/lang/String";
    pub const ENUM: &str = "java/lang/Enum";
    pub const THROWABLE: &str = "java/lang/Throwable";
    pub const EXCEPTION: &str = "java/lang/Exception";
    pub const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";
    pub const ERROR: &str = "java/lang/Error";
    pub const THREAD_DEATH: &str = "java/lang/ThreadDeath";
    pub const LINKAGE_ERROR: &str = "java/lang/LinkageError";
    pub const NO_CLASS_DEF_FOUND: &str = "java/lang/NoClassDefFoundError";
    pub const CLASS_NOT_FOUND: &str = "java/lang/ClassNotFoundException";
    pub const REFLECTIVE_OPERATION: &str = "java/lang/ReflectiveOperationException";
    pub const ARITHMETIC: &str = "java/lang/ArithmeticException";
    pub const NULL_POINTER: &str = "java/lang/NullPointerException";
    pub const CLASS_CAST: &str = "java/lang/ClassCastException";
    pub const INDEX_OUT_OF_BOUNDS: &str = "java/lang/IndexOutOfBoundsException";
    pub const ARRAY_INDEX_OUT_OF_BOUNDS: &str = "java/lang/ArrayIndexOutOfBoundsException";
    pub const NEGATIVE_ARRAY_SIZE: &str = "java/lang/NegativeArraySizeException";
    pub const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";
    pub const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
    pub const UNSUPPORTED_OPERATION: &str = "java/lang/UnsupportedOperationException";

    pub const BOOLEAN: &str = "java/lang/Boolean";
    pub const CHARACTER: &str = "java/lang/Character";
    pub const BYTE: &str = "java/lang/Byte";
    pub const SHORT: &str = "java/lang/Short";
    pub const INTEGER: &str = "java/lang/Integer";
    pub const LONG: &str = "java/lang/Long";
    pub const FLOAT: &str = "java/lang/Float";
    pub const DOUBLE: &str = "java/lang/Double";

    pub const RULE_VIOLATION: &str = "djvm/rules/RuleViolationError";
    pub const THRESHOLD_VIOLATION: &str = "djvm/rules/ThresholdViolationError";
}

/// Sandbox-world classes, relative to the namespace.
pub mod sandbox {
    pub const DJVM: &str = "java/lang/DJVM";
    pub const DJVM_EXCEPTION: &str = "java/lang/DJVMException";
    pub const THROWABLE_WRAPPER: &str = "java/lang/ThrowableWrapper";
    pub const LIST: &str = "java/util/List";
    pub const ARRAY_LIST: &str = "java/util/ArrayList";
}

/// Boxed primitive wrappers, shared by both worlds.
pub const BOXED_CLASSES: &[&str] = &[
    host::BOOLEAN,
    host::CHARACTER,
    host::BYTE,
    host::SHORT,
    host::INTEGER,
    host::LONG,
    host::FLOAT,
    host::DOUBLE,
];

/// Host exception classes that keep their identity across the boundary.
/// Sandbox code catching one of these catches the host class itself.
/// Listed superclass-first.
pub const DEFAULT_JVM_EXCEPTIONS: &[(&str, &str)] = &[
    (host::THROWABLE, host::OBJECT),
    (host::EXCEPTION, host::THROWABLE),
    (host::ERROR, host::THROWABLE),
    (host::LINKAGE_ERROR, host::ERROR),
    (host::NO_CLASS_DEF_FOUND, host::LINKAGE_ERROR),
    (host::RUNTIME_EXCEPTION, host::EXCEPTION),
    (host::REFLECTIVE_OPERATION, host::EXCEPTION),
    (host::CLASS_NOT_FOUND, host::REFLECTIVE_OPERATION),
    (host::ARITHMETIC, host::RUNTIME_EXCEPTION),
    (host::NULL_POINTER, host::RUNTIME_EXCEPTION),
    (host::CLASS_CAST, host::RUNTIME_EXCEPTION),
    (host::INDEX_OUT_OF_BOUNDS, host::RUNTIME_EXCEPTION),
    (host::ARRAY_INDEX_OUT_OF_BOUNDS, host::INDEX_OUT_OF_BOUNDS),
    (host::NEGATIVE_ARRAY_SIZE, host::RUNTIME_EXCEPTION),
    (host::ILLEGAL_ARGUMENT, host::RUNTIME_EXCEPTION),
    (host::ILLEGAL_STATE, host::RUNTIME_EXCEPTION),
    (host::UNSUPPORTED_OPERATION, host::RUNTIME_EXCEPTION),
];

/// Host classes that sandboxed code may reference without relocation.
pub const DEFAULT_PINNED_HOST_CLASSES: &[&str] = &[host::RULE_VIOLATION, host::THRESHOLD_VIOLATION];

/// Sandbox runtime classes that sandboxed code may reference without relocation.
pub const DEFAULT_PINNED_SANDBOX_CLASSES: &[&str] =
    &[sandbox::DJVM, sandbox::DJVM_EXCEPTION, sandbox::THROWABLE_WRAPPER];

/// Sandbox runtime classes whose members use host types in their descriptors.
pub const DEFAULT_TEMPLATE_CLASSES: &[&str] = &[
    host::STRING,
    host::BOOLEAN,
    host::CHARACTER,
    host::BYTE,
    host::SHORT,
    host::INTEGER,
    host::LONG,
    host::FLOAT,
    host::DOUBLE,
];

/// Internal-name patterns exempt from relocation.
pub const DEFAULT_WHITELIST: &[&str] = &["^java/lang/invoke/.*$"];

/// Binary-name patterns that `class_for_name` refuses to load.
pub const DEFAULT_BANNED_CLASSES: &[&str] = &[r"^java\.lang\.DJVM(.*)?$", r"^djvm\..*$", r"^Task$"];
