//! Auto-print rewriting: echo the value of a trailing bare expression.
//!
//! Notebook-style convenience for callers that opt in: when the last
//! top-level statement is an expression (and not already a `print` call),
//! it is rewritten in place to
//!
//! ```text
//! __auto_print_result = <expr>
//! if __auto_print_result is not None:
//!     print(__auto_print_result)
//! ```
//!
//! Anything else — assignments, definitions, trailing `print`, empty or
//! unparseable source — is returned untouched; a syntax error here will be
//! reported properly by the validator or the interpreter.

use std::borrow::Cow;

use rustpython_parser::{ast, Parse};

const RESULT_NAME: &str = "__auto_print_result";

/// Rewrite `source` so a trailing bare expression prints its value.
pub fn wrap(source: &str) -> Cow<'_, str> {
    if source.trim().is_empty() {
        return Cow::Borrowed(source);
    }
    let Ok(suite) = ast::Suite::parse(source, "<user-code>") else {
        return Cow::Borrowed(source);
    };
    let Some(ast::Stmt::Expr(last)) = suite.last() else {
        return Cow::Borrowed(source);
    };
    if is_print_call(&last.value) {
        return Cow::Borrowed(source);
    }

    let start = usize::from(last.range.start());
    let end = usize::from(last.range.end());
    let expr_text = &source[start..end];

    let mut wrapped = String::with_capacity(source.len() + 3 * RESULT_NAME.len() + 64);
    wrapped.push_str(&source[..start]);
    wrapped.push_str(RESULT_NAME);
    wrapped.push_str(" = ");
    wrapped.push_str(expr_text);
    wrapped.push_str("\nif ");
    wrapped.push_str(RESULT_NAME);
    wrapped.push_str(" is not None:\n    print(");
    wrapped.push_str(RESULT_NAME);
    wrapped.push(')');
    wrapped.push_str(&source[end..]);
    Cow::Owned(wrapped)
}

fn is_print_call(expr: &ast::Expr) -> bool {
    match expr {
        ast::Expr::Call(call) => {
            matches!(call.func.as_ref(), ast::Expr::Name(name) if name.id.as_str() == "print")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_simple_expression() {
        assert_eq!(
            wrap("1 + 2"),
            "__auto_print_result = 1 + 2\n\
             if __auto_print_result is not None:\n    print(__auto_print_result)"
        );
    }

    #[test]
    fn wraps_expression_using_variables() {
        let wrapped = wrap("x = 5\nx + 10");
        assert!(wrapped.contains("x = 5"));
        assert!(wrapped.contains("__auto_print_result = x + 10"));
        assert!(wrapped.contains("print(__auto_print_result)"));
    }

    #[test]
    fn wraps_expression_after_import() {
        let wrapped = wrap("import math\nmath.pi * 2");
        assert!(wrapped.contains("import math"));
        assert!(wrapped.contains("__auto_print_result = math.pi * 2"));
    }

    #[test]
    fn trailing_print_left_alone() {
        let source = "x = 5\nprint(x)";
        assert_eq!(wrap(source), source);
    }

    #[test]
    fn trailing_assignment_left_alone() {
        let source = "x = 5\ny = x + 10";
        assert_eq!(wrap(source), source);
    }

    #[test]
    fn trailing_function_def_left_alone() {
        let source = "def add(a, b):\n    return a + b";
        assert_eq!(wrap(source), source);
    }

    #[test]
    fn trailing_class_def_left_alone() {
        let source = "class MyClass:\n    pass";
        assert_eq!(wrap(source), source);
    }

    #[test]
    fn empty_source_left_alone() {
        assert_eq!(wrap(""), "");
    }

    #[test]
    fn whitespace_source_left_alone() {
        let source = "   \n  \t  ";
        assert_eq!(wrap(source), source);
    }

    #[test]
    fn syntax_error_left_alone() {
        let source = "x = 5 +";
        assert_eq!(wrap(source), source);
    }

    #[test]
    fn multiline_trailing_expression() {
        let wrapped = wrap("(1 +\n 2)");
        assert!(wrapped.starts_with("__auto_print_result = (1 +\n 2)"));
    }

    #[test]
    fn wrapped_code_still_validates() {
        let wrapped = wrap("import math\nmath.sqrt(16)");
        assert_eq!(crate::validator::validate(&wrapped), Ok(()));
    }
}
