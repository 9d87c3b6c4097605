//! Policy catalog: which imports, builtins, and attributes user code may
//! touch.
//!
//! Pure data plus predicates. Name matching is case-sensitive and always
//! operates on the top-level package component: `matplotlib.pyplot` is
//! judged as `matplotlib`.
//!
//! The import rules are deliberately redundant: a module can be rejected
//! both for being blacklisted and for being absent from the whitelist. The
//! blacklist produces the specific "not allowed" message and keeps the
//! dangerous set rejected even if the whitelist is extended carelessly.

/// Modules that must never be imported: process control, interpreter
/// internals, dynamic import, file and network access, serialization.
pub const FORBIDDEN_IMPORTS: &[&str] = &[
    "os",
    "subprocess",
    "sys",
    "importlib",
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "file",
    "input",
    "raw_input",
    "socket",
    "urllib",
    "httplib",
    "ftplib",
    "telnetlib",
    "pickle",
    "cPickle",
    "marshal",
    "shelve",
];

/// Builtins that are code-injection or host-access vectors when called.
pub const FORBIDDEN_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "file",
    "input",
    "raw_input",
    "execfile",
    "reload",
];

/// Builtins that reach attributes dynamically and defeat the static
/// attribute rule; rejected in call position.
pub const DYNAMIC_ATTR_BUILTINS: &[&str] = &["getattr", "setattr", "delattr"];

/// Whitelist of importable top-level packages: numeric and symbolic math,
/// collection/iteration helpers, date/time, text processing, structured
/// data, and the preinstalled scientific stack.
pub const PERMITTED_IMPORTS: &[&str] = &[
    "math",
    "cmath",
    "decimal",
    "fractions",
    "random",
    "statistics",
    "itertools",
    "functools",
    "operator",
    "collections",
    "heapq",
    "bisect",
    "array",
    "datetime",
    "calendar",
    "copy",
    "pprint",
    "re",
    "string",
    "textwrap",
    "unicodedata",
    "json",
    "csv",
    "numpy",
    "sympy",
    "pandas",
    "matplotlib",
    "scipy",
    "sklearn",
];

/// Attributes that expose the runtime: globals/bytecode introspection and
/// the class-graph walkers used to reach arbitrary objects.
pub const FORBIDDEN_ATTRIBUTES: &[&str] = &[
    "__globals__",
    "__code__",
    "__class__",
    "__bases__",
    "__subclasses__",
];

/// Top-level package component of a possibly-dotted module path.
#[inline]
pub fn top_level(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

pub fn is_forbidden_import(name: &str) -> bool {
    FORBIDDEN_IMPORTS.contains(&top_level(name))
}

pub fn is_permitted_import(name: &str) -> bool {
    PERMITTED_IMPORTS.contains(&top_level(name))
}

pub fn is_forbidden_builtin(name: &str) -> bool {
    FORBIDDEN_BUILTINS.contains(&name)
}

pub fn is_dynamic_attr_builtin(name: &str) -> bool {
    DYNAMIC_ATTR_BUILTINS.contains(&name)
}

pub fn is_forbidden_attribute(name: &str) -> bool {
    FORBIDDEN_ATTRIBUTES.contains(&name)
}
