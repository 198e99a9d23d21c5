//! Expression errors.
//!
//! Lexing and parsing errors carry the byte offset into the expression;
//! evaluation errors name the operation that failed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum EvalError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { pos: usize, ch: char },

    #[error("unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },

    #[error("invalid number '{text}' at {pos}")]
    InvalidNumber { pos: usize, text: String },

    #[error("expected {expected} at {pos}, found {found}")]
    UnexpectedToken {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    #[error("divide by zero")]
    DivideByZero,

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("unknown method '{name}' on {target}")]
    UnknownMethod { name: String, target: String },

    #[error("'{name}' takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("expression nesting exceeds {limit}")]
    DepthExceeded { limit: usize },
}
