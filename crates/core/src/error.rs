use crate::types::Type;

/// Errors raised while constructing or validating expressions and rules.
///
/// Construction errors are definitive: an `Expr` that was built without one
/// of these is well-typed with respect to the operator contracts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The literal data does not parse as the requested type.
    #[error("cannot parse {data:?} as {ty}")]
    BadLiteral { ty: Type, data: String },

    /// No operator with this opcode is registered.
    #[error("no operator {opcode:?} exists")]
    UnknownOperator { opcode: String },

    /// A parameter reference could not be resolved against the signature.
    #[error("unknown parameter {name:?}")]
    UnknownParameter { name: String },

    /// The operand sequence does not satisfy the operator's contract.
    /// `got` is either a type name or a description of the arity problem.
    #[error("operator {opcode:?} term {term_index}: expected {expected}, got {got}")]
    ContractViolation {
        opcode: String,
        term_index: usize,
        expected: Type,
        got: String,
    },

    /// A parameter declaration is malformed (empty or non-identifier name,
    /// abstract type, or a `let` binding that is not a parameter node).
    #[error("invalid parameter: {0}")]
    BadParam(String),

    /// A rule does not agree with its ruleset signature.
    #[error("rule {rule}: {message}")]
    SignatureMismatch { rule: usize, message: String },

    /// A serialized expression has an invalid shape.
    #[error("invalid expression encoding: {0}")]
    Encoding(String),
}

/// Errors raised while evaluating an expression against a params bag.
///
/// Evaluation short-circuits on the first failure; there is no
/// accumulation at this layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The params bag has no entry under this name.
    #[error("parameter {name:?} not found")]
    ParamNotFound { name: String },

    /// The params bag holds a value of a different type under this name.
    #[error("parameter {name:?} is not of type {expected}")]
    ParamTypeMismatch { name: String, expected: Type },

    /// An operand evaluated to a value of the wrong concrete type.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: Type, got: Type },

    /// A `let` binding would shadow an existing parameter.
    #[error("parameter {name:?} already defined")]
    ParamAlreadyDefined { name: String },

    /// Numeric data failed to parse or compare during evaluation.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// The expression tree is structurally unsound (only reachable when a
    /// tree bypassed the checked constructors).
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// No rule predicate evaluated to true.
    #[error("no rule matched")]
    NoMatch,
}
