//! Formula bytecode decoding: the token registry, the RPN parser, and the
//! parse tree with its rewrite operations.

mod funcs;
mod node;
mod parser;
mod token;

pub use node::{
    AreaReference, BinaryOp, CellReference, Corner, FunctionCall, IfConstruct, ParseNode,
    RenderContext, SubExpression, UnaryOp,
};
pub use parser::parse_tokens;
pub use token::{PtgClass, Token, TokenCodes};

use thiserror::Error;

/// A formula-fatal decode error.
///
/// A single bad formula does not invalidate the rest of the sheet: the
/// sheet decoder logs the error and skips the offending cell.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormulaError {
    /// A byte that maps to no known token. Unlike unknown records, an
    /// unparseable formula cannot be partially trusted.
    #[error("unrecognized formula token byte 0x{0:02X}")]
    UnrecognizedToken(u8),
    /// A known token the parser does not model (array constants, macro
    /// commands, shared/array pointers that should have been resolved by
    /// the sheet decoder).
    #[error("unsupported formula token byte 0x{0:02X}")]
    UnsupportedToken(u8),
    /// A fixed-arity function token with an id outside the function table;
    /// the argument count is unknowable, so the scan cannot continue.
    #[error("unknown fixed-arity function id {0}")]
    UnknownFunction(u16),
    /// An operator or call token without enough operands on the stack.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// The scan ended with a residual stack size other than one.
    #[error("formula scan left {0} items on the operand stack")]
    ResidualStack(usize),
    /// Nested sub-expressions beyond the recursion cap.
    #[error("sub-expression nesting too deep")]
    SubExpressionDepth,
    /// A token payload or declared sub-expression extends past the input.
    #[error("truncated formula token stream")]
    Truncated,
}
