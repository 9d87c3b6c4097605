//! Static admission control.
//!
//! Parses user code to a Python AST and walks every node once, pre-order,
//! consulting the policy catalog:
//!
//! - `import X` / `from X import …` — the top-level package of `X` must not
//!   be blacklisted and must be whitelisted (leading-underscore names are
//!   admitted as interpreter-internal)
//! - calls to a bare name — rejected for forbidden builtins and for the
//!   dynamic-attribute trio
//! - `obj.attr` — rejected for runtime-introspection attributes
//!
//! Everything else is admitted and the traversal continues into children.
//! The validator never executes anything and reports the first violation it
//! finds; which of several violations is found first is unspecified.
//!
//! This layer raises the bar, it is not sound against a determined
//! attacker; the OS-level caps in `pyrunner-sandbox` are the real boundary.

use rustpython_parser::{ast, Parse};
use thiserror::Error;

use crate::policy;

/// Why a piece of code was refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("import of '{0}' is not allowed")]
    ForbiddenImport(String),

    #[error("import of '{0}' is not in the allowed list")]
    UnlistedImport(String),

    #[error("call to '{0}' is not allowed")]
    ForbiddenCall(String),

    #[error("access to '{0}' attribute is not allowed")]
    ForbiddenAttribute(String),
}

/// Validate `source` against the policy catalog.
pub fn validate(source: &str) -> Result<(), Rejection> {
    let suite = ast::Suite::parse(source, "<user-code>")
        .map_err(|e| Rejection::Syntax(e.to_string()))?;
    walk_body(&suite)
}

fn check_module_name(name: &str) -> Result<(), Rejection> {
    let head = policy::top_level(name);
    if policy::is_forbidden_import(head) {
        return Err(Rejection::ForbiddenImport(head.to_string()));
    }
    if !policy::is_permitted_import(head) && !head.starts_with('_') {
        return Err(Rejection::UnlistedImport(head.to_string()));
    }
    Ok(())
}

fn walk_body(body: &[ast::Stmt]) -> Result<(), Rejection> {
    for stmt in body {
        walk_stmt(stmt)?;
    }
    Ok(())
}

fn walk_stmt(stmt: &ast::Stmt) -> Result<(), Rejection> {
    match stmt {
        ast::Stmt::Import(node) => {
            for alias in &node.names {
                check_module_name(alias.name.as_str())?;
            }
        }
        ast::Stmt::ImportFrom(node) => {
            // Relative imports (`from . import x`) have no module name and
            // resolve inside the scratch directory; nothing to check here.
            if let Some(module) = &node.module {
                check_module_name(module.as_str())?;
            }
        }
        ast::Stmt::FunctionDef(node) => {
            walk_arguments(&node.args)?;
            for dec in &node.decorator_list {
                walk_expr(dec)?;
            }
            if let Some(returns) = &node.returns {
                walk_expr(returns)?;
            }
            walk_body(&node.body)?;
        }
        ast::Stmt::AsyncFunctionDef(node) => {
            walk_arguments(&node.args)?;
            for dec in &node.decorator_list {
                walk_expr(dec)?;
            }
            if let Some(returns) = &node.returns {
                walk_expr(returns)?;
            }
            walk_body(&node.body)?;
        }
        ast::Stmt::ClassDef(node) => {
            for base in &node.bases {
                walk_expr(base)?;
            }
            for kw in &node.keywords {
                walk_expr(&kw.value)?;
            }
            for dec in &node.decorator_list {
                walk_expr(dec)?;
            }
            walk_body(&node.body)?;
        }
        ast::Stmt::Return(node) => {
            if let Some(value) = &node.value {
                walk_expr(value)?;
            }
        }
        ast::Stmt::Delete(node) => {
            for target in &node.targets {
                walk_expr(target)?;
            }
        }
        ast::Stmt::Assign(node) => {
            for target in &node.targets {
                walk_expr(target)?;
            }
            walk_expr(&node.value)?;
        }
        ast::Stmt::AugAssign(node) => {
            walk_expr(&node.target)?;
            walk_expr(&node.value)?;
        }
        ast::Stmt::AnnAssign(node) => {
            walk_expr(&node.target)?;
            walk_expr(&node.annotation)?;
            if let Some(value) = &node.value {
                walk_expr(value)?;
            }
        }
        ast::Stmt::TypeAlias(node) => {
            walk_expr(&node.name)?;
            walk_expr(&node.value)?;
        }
        ast::Stmt::For(node) => {
            walk_expr(&node.target)?;
            walk_expr(&node.iter)?;
            walk_body(&node.body)?;
            walk_body(&node.orelse)?;
        }
        ast::Stmt::AsyncFor(node) => {
            walk_expr(&node.target)?;
            walk_expr(&node.iter)?;
            walk_body(&node.body)?;
            walk_body(&node.orelse)?;
        }
        ast::Stmt::While(node) => {
            walk_expr(&node.test)?;
            walk_body(&node.body)?;
            walk_body(&node.orelse)?;
        }
        ast::Stmt::If(node) => {
            walk_expr(&node.test)?;
            walk_body(&node.body)?;
            walk_body(&node.orelse)?;
        }
        ast::Stmt::With(node) => {
            for item in &node.items {
                walk_expr(&item.context_expr)?;
                if let Some(vars) = &item.optional_vars {
                    walk_expr(vars)?;
                }
            }
            walk_body(&node.body)?;
        }
        ast::Stmt::AsyncWith(node) => {
            for item in &node.items {
                walk_expr(&item.context_expr)?;
                if let Some(vars) = &item.optional_vars {
                    walk_expr(vars)?;
                }
            }
            walk_body(&node.body)?;
        }
        ast::Stmt::Match(node) => {
            walk_expr(&node.subject)?;
            for case in &node.cases {
                walk_pattern(&case.pattern)?;
                if let Some(guard) = &case.guard {
                    walk_expr(guard)?;
                }
                walk_body(&case.body)?;
            }
        }
        ast::Stmt::Raise(node) => {
            if let Some(exc) = &node.exc {
                walk_expr(exc)?;
            }
            if let Some(cause) = &node.cause {
                walk_expr(cause)?;
            }
        }
        ast::Stmt::Try(node) => {
            walk_body(&node.body)?;
            for handler in &node.handlers {
                walk_handler(handler)?;
            }
            walk_body(&node.orelse)?;
            walk_body(&node.finalbody)?;
        }
        ast::Stmt::TryStar(node) => {
            walk_body(&node.body)?;
            for handler in &node.handlers {
                walk_handler(handler)?;
            }
            walk_body(&node.orelse)?;
            walk_body(&node.finalbody)?;
        }
        ast::Stmt::Assert(node) => {
            walk_expr(&node.test)?;
            if let Some(msg) = &node.msg {
                walk_expr(msg)?;
            }
        }
        ast::Stmt::Expr(node) => {
            walk_expr(&node.value)?;
        }
        // Pass, Break, Continue, Global, Nonlocal: nothing to check.
        _ => {}
    }
    Ok(())
}

fn walk_handler(handler: &ast::ExceptHandler) -> Result<(), Rejection> {
    let ast::ExceptHandler::ExceptHandler(node) = handler;
    if let Some(type_) = &node.type_ {
        walk_expr(type_)?;
    }
    walk_body(&node.body)
}

fn walk_arguments(args: &ast::Arguments) -> Result<(), Rejection> {
    for arg in args
        .posonlyargs
        .iter()
        .chain(&args.args)
        .chain(&args.kwonlyargs)
    {
        if let Some(annotation) = &arg.def.annotation {
            walk_expr(annotation)?;
        }
        if let Some(default) = &arg.default {
            walk_expr(default)?;
        }
    }
    if let Some(vararg) = &args.vararg {
        if let Some(annotation) = &vararg.annotation {
            walk_expr(annotation)?;
        }
    }
    if let Some(kwarg) = &args.kwarg {
        if let Some(annotation) = &kwarg.annotation {
            walk_expr(annotation)?;
        }
    }
    Ok(())
}

fn walk_pattern(pattern: &ast::Pattern) -> Result<(), Rejection> {
    match pattern {
        ast::Pattern::MatchValue(node) => walk_expr(&node.value),
        ast::Pattern::MatchSingleton(_) => Ok(()),
        ast::Pattern::MatchSequence(node) => {
            for p in &node.patterns {
                walk_pattern(p)?;
            }
            Ok(())
        }
        ast::Pattern::MatchMapping(node) => {
            for key in &node.keys {
                walk_expr(key)?;
            }
            for p in &node.patterns {
                walk_pattern(p)?;
            }
            Ok(())
        }
        ast::Pattern::MatchClass(node) => {
            walk_expr(&node.cls)?;
            for p in node.patterns.iter().chain(&node.kwd_patterns) {
                walk_pattern(p)?;
            }
            Ok(())
        }
        ast::Pattern::MatchStar(_) => Ok(()),
        ast::Pattern::MatchAs(node) => {
            if let Some(p) = &node.pattern {
                walk_pattern(p)?;
            }
            Ok(())
        }
        ast::Pattern::MatchOr(node) => {
            for p in &node.patterns {
                walk_pattern(p)?;
            }
            Ok(())
        }
    }
}

fn walk_expr(expr: &ast::Expr) -> Result<(), Rejection> {
    match expr {
        ast::Expr::Call(node) => {
            if let ast::Expr::Name(name) = node.func.as_ref() {
                let id = name.id.as_str();
                if policy::is_forbidden_builtin(id) || policy::is_dynamic_attr_builtin(id) {
                    return Err(Rejection::ForbiddenCall(id.to_string()));
                }
            }
            walk_expr(&node.func)?;
            for arg in &node.args {
                walk_expr(arg)?;
            }
            for kw in &node.keywords {
                walk_expr(&kw.value)?;
            }
        }
        ast::Expr::Attribute(node) => {
            let attr = node.attr.as_str();
            if policy::is_forbidden_attribute(attr) {
                return Err(Rejection::ForbiddenAttribute(attr.to_string()));
            }
            walk_expr(&node.value)?;
        }
        ast::Expr::BoolOp(node) => {
            for value in &node.values {
                walk_expr(value)?;
            }
        }
        ast::Expr::NamedExpr(node) => {
            walk_expr(&node.target)?;
            walk_expr(&node.value)?;
        }
        ast::Expr::BinOp(node) => {
            walk_expr(&node.left)?;
            walk_expr(&node.right)?;
        }
        ast::Expr::UnaryOp(node) => {
            walk_expr(&node.operand)?;
        }
        ast::Expr::Lambda(node) => {
            walk_arguments(&node.args)?;
            walk_expr(&node.body)?;
        }
        ast::Expr::IfExp(node) => {
            walk_expr(&node.test)?;
            walk_expr(&node.body)?;
            walk_expr(&node.orelse)?;
        }
        ast::Expr::Dict(node) => {
            for key in node.keys.iter().flatten() {
                walk_expr(key)?;
            }
            for value in &node.values {
                walk_expr(value)?;
            }
        }
        ast::Expr::Set(node) => {
            for elt in &node.elts {
                walk_expr(elt)?;
            }
        }
        ast::Expr::ListComp(node) => {
            walk_expr(&node.elt)?;
            walk_comprehensions(&node.generators)?;
        }
        ast::Expr::SetComp(node) => {
            walk_expr(&node.elt)?;
            walk_comprehensions(&node.generators)?;
        }
        ast::Expr::DictComp(node) => {
            walk_expr(&node.key)?;
            walk_expr(&node.value)?;
            walk_comprehensions(&node.generators)?;
        }
        ast::Expr::GeneratorExp(node) => {
            walk_expr(&node.elt)?;
            walk_comprehensions(&node.generators)?;
        }
        ast::Expr::Await(node) => {
            walk_expr(&node.value)?;
        }
        ast::Expr::Yield(node) => {
            if let Some(value) = &node.value {
                walk_expr(value)?;
            }
        }
        ast::Expr::YieldFrom(node) => {
            walk_expr(&node.value)?;
        }
        ast::Expr::Compare(node) => {
            walk_expr(&node.left)?;
            for comparator in &node.comparators {
                walk_expr(comparator)?;
            }
        }
        ast::Expr::FormattedValue(node) => {
            walk_expr(&node.value)?;
            if let Some(spec) = &node.format_spec {
                walk_expr(spec)?;
            }
        }
        ast::Expr::JoinedStr(node) => {
            for value in &node.values {
                walk_expr(value)?;
            }
        }
        ast::Expr::Subscript(node) => {
            walk_expr(&node.value)?;
            walk_expr(&node.slice)?;
        }
        ast::Expr::Starred(node) => {
            walk_expr(&node.value)?;
        }
        ast::Expr::List(node) => {
            for elt in &node.elts {
                walk_expr(elt)?;
            }
        }
        ast::Expr::Tuple(node) => {
            for elt in &node.elts {
                walk_expr(elt)?;
            }
        }
        ast::Expr::Slice(node) => {
            if let Some(lower) = &node.lower {
                walk_expr(lower)?;
            }
            if let Some(upper) = &node.upper {
                walk_expr(upper)?;
            }
            if let Some(step) = &node.step {
                walk_expr(step)?;
            }
        }
        // Constant, Name outside call position: admitted.
        _ => {}
    }
    Ok(())
}

fn walk_comprehensions(generators: &[ast::Comprehension]) -> Result<(), Rejection> {
    for comp in generators {
        walk_expr(&comp.target)?;
        walk_expr(&comp.iter)?;
        for cond in &comp.ifs {
            walk_expr(cond)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_plain_print() {
        assert_eq!(validate("print('hello')"), Ok(()));
    }

    #[test]
    fn admits_permitted_import() {
        assert_eq!(validate("import math\nprint(math.sqrt(16))"), Ok(()));
    }

    #[test]
    fn admits_every_permitted_import() {
        let source: String = crate::policy::PERMITTED_IMPORTS
            .iter()
            .map(|m| format!("import {m}\n"))
            .collect();
        assert_eq!(validate(&source), Ok(()));
    }

    #[test]
    fn rejects_forbidden_import() {
        assert_eq!(
            validate("import os"),
            Err(Rejection::ForbiddenImport("os".into()))
        );
    }

    #[test]
    fn rejects_dotted_forbidden_head() {
        assert_eq!(
            validate("import os.path"),
            Err(Rejection::ForbiddenImport("os".into()))
        );
    }

    #[test]
    fn rejects_forbidden_import_alias() {
        assert_eq!(
            validate("import subprocess as sp"),
            Err(Rejection::ForbiddenImport("subprocess".into()))
        );
    }

    #[test]
    fn rejects_from_import_of_forbidden_module() {
        assert_eq!(
            validate("from os import getcwd"),
            Err(Rejection::ForbiddenImport("os".into()))
        );
    }

    #[test]
    fn rejects_unlisted_import() {
        assert_eq!(
            validate("import requests"),
            Err(Rejection::UnlistedImport("requests".into()))
        );
    }

    #[test]
    fn admits_underscore_import() {
        assert_eq!(validate("import _frozen_importlib"), Ok(()));
    }

    #[test]
    fn admits_relative_import() {
        assert_eq!(validate("from . import helper"), Ok(()));
    }

    #[test]
    fn from_import_symbols_not_filtered() {
        // The module is whitelisted; the imported symbols are reachable
        // through it anyway and are not judged individually.
        assert_eq!(validate("from math import sqrt, pi"), Ok(()));
    }

    #[test]
    fn rejects_eval_call() {
        assert_eq!(
            validate("eval(\"1+1\")"),
            Err(Rejection::ForbiddenCall("eval".into()))
        );
    }

    #[test]
    fn rejects_open_call() {
        assert_eq!(
            validate("open('/etc/passwd')"),
            Err(Rejection::ForbiddenCall("open".into()))
        );
    }

    #[test]
    fn rejects_dynamic_attr_call() {
        assert_eq!(
            validate("getattr(int, 'mro')"),
            Err(Rejection::ForbiddenCall("getattr".into()))
        );
    }

    #[test]
    fn rejects_forbidden_attribute() {
        assert_eq!(
            validate("x = (lambda: 0).__globals__"),
            Err(Rejection::ForbiddenAttribute("__globals__".into()))
        );
    }

    #[test]
    fn rejects_subclasses_walk() {
        // Several attributes here are forbidden; which one is reported
        // first is unspecified, only that the code is rejected.
        match validate("().__class__.__bases__[0].__subclasses__()") {
            Err(Rejection::ForbiddenAttribute(attr)) => {
                assert!(crate::policy::is_forbidden_attribute(&attr));
            }
            other => panic!("expected attribute rejection, got {other:?}"),
        }
    }

    #[test]
    fn rejects_violation_inside_function_body() {
        let source = "def f():\n    import socket\n";
        assert_eq!(
            validate(source),
            Err(Rejection::ForbiddenImport("socket".into()))
        );
    }

    #[test]
    fn rejects_violation_inside_comprehension() {
        assert_eq!(
            validate("[eval(x) for x in ['1']]"),
            Err(Rejection::ForbiddenCall("eval".into()))
        );
    }

    #[test]
    fn rejects_violation_in_default_argument() {
        assert_eq!(
            validate("def f(x=eval('1')):\n    pass"),
            Err(Rejection::ForbiddenCall("eval".into()))
        );
    }

    #[test]
    fn rejects_violation_in_fstring() {
        assert_eq!(
            validate("x = f\"{eval('1')}\""),
            Err(Rejection::ForbiddenCall("eval".into()))
        );
    }

    #[test]
    fn syntax_error_is_a_rejection() {
        match validate("x = 5 +") {
            Err(Rejection::Syntax(msg)) => assert!(!msg.is_empty()),
            other => panic!("expected syntax rejection, got {other:?}"),
        }
    }

    #[test]
    fn method_named_like_builtin_is_admitted() {
        // Only bare-name calls are judged; `df.eval(...)` goes through the
        // attribute rule, and `eval` is not a forbidden attribute.
        assert_eq!(validate("import pandas\npandas.DataFrame().eval('1')"), Ok(()));
    }
}
