//! The control-flow-annotated token list consumed by the compiler.
//!
//! Produced by the upstream control-flow analysis pass. For every opened
//! `Loop`/`Block`/`If`/`IfNot` region there is exactly one matching `End`
//! later in the sequence; the nesting is stack-balanced. The compiler
//! consumes the list read-only and reports a structural error when the
//! invariant does not hold.

use crate::ins::Instruction;

/// An ordered run of decoded instructions starting at `pc`.
#[derive(Debug, Clone)]
pub struct TokenCode {
    pub pc: u32,
    pub instructions: Vec<Instruction>,
}

/// Condition of an `If`/`IfNot` token: the flow-control temporary
/// materialized by a preceding `SetValue` token, tested against zero.
#[derive(Debug, Clone, Copy)]
pub struct TokenCondition {
    pub variable: u32,
}

/// Assigns a constant to a flow-control temporary.
#[derive(Debug, Clone, Copy)]
pub struct TokenSetValue {
    pub variable: u32,
    pub value: u32,
}

/// Declares a flow-control temporary; materialized in a pre-pass before any
/// code compiles.
#[derive(Debug, Clone, Copy)]
pub struct TokenVariable {
    pub init: u32,
}

#[derive(Debug, Clone)]
pub enum Token {
    Code(TokenCode),
    Loop,
    Block,
    If(TokenCondition),
    IfNot(TokenCondition),
    Else,
    Branch,
    End,
    SetValue(TokenSetValue),
    Variable(TokenVariable),
    Invalid,
}
