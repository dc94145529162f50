//! The s-expression authoring surface.
//!
//! Grammar (whitespace-separated tokens):
//!
//! ```text
//! expr     := atom | list
//! list     := '(' opcode arg* ')'
//! atom     := bool | int | float | string | param-ref
//! bool     := '#true' | '#false'
//! let      := '(' 'let' name type value body ')'
//! ```
//!
//! Surface operator names: `=`, `>`, `>=`, `<`, `<=`, `not`, `and`, `or`,
//! `in`, `fnv`, `percentile`, `let`. Identifiers in argument position are
//! parameter references resolved against the ruleset signature and any open
//! `let` scopes.

mod lexer;
mod parser;
mod print;

use serde::Serialize;

pub use parser::{parse_expr, parse_rules, RuleDiagnostic, SourceRule};
pub use print::print;

/// A source position: 1-based line, 0-based column, absolute byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
    pub abs: u32,
}

/// A positioned parse diagnostic.
///
/// Serializes with the wire field names used by authoring clients:
/// `message`, `line`, `char`, `absChar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message} at line {line}, char {column}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    #[serde(rename = "char")]
    pub column: u32,
    #[serde(rename = "absChar")]
    pub abs_char: u32,
}

impl ParseError {
    pub(crate) fn at(pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: pos.line,
            column: pos.column,
            abs_char: pos.abs,
        }
    }
}
