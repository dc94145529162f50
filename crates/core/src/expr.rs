//! The expression tree and its evaluation entry points.
//!
//! Expressions are a sum of three variants — literal values, parameter
//! lookups, and operator applications — with operator-specific behaviour
//! living in the registry (`ops`), not in per-variant code. Trees are pure:
//! no sharing, no cycles, cloning is structural.

use crate::error::{Error, EvalError};
use crate::ops;
use crate::params::Params;
use crate::types::Type;
use crate::value::{Param, Value};

/// A logical expression that can be evaluated to a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(Value),
    Param(Param),
    Operator(Operator),
}

/// An operator application. Only constructed through [`Expr::operator`],
/// which enforces the opcode's contract, so every reachable node is
/// well-typed.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub(crate) opcode: String,
    pub(crate) operands: Vec<Expr>,
}

impl Operator {
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn operands(&self) -> &[Expr] {
        &self.operands
    }
}

impl Expr {
    /// Apply the named operator to the given operands.
    ///
    /// Fails with `UnknownOperator` when the opcode is not registered and
    /// with `ContractViolation` when the operand sequence does not satisfy
    /// the opcode's contract.
    pub fn operator(opcode: &str, operands: Vec<Expr>) -> Result<Expr, Error> {
        let contract = ops::contract(opcode).ok_or_else(|| Error::UnknownOperator {
            opcode: opcode.to_string(),
        })?;

        let types: Vec<Type> = operands.iter().map(Expr::return_type).collect();
        contract.check(&types)?;

        // The first operand of `let` introduces the binding; it must be a
        // parameter node, which the ANY term alone cannot express.
        if opcode == "let" && !matches!(operands.first(), Some(Expr::Param(_))) {
            return Err(Error::BadParam(
                "let binding must be a parameter".to_string(),
            ));
        }

        Ok(Expr::Operator(Operator {
            opcode: contract.opcode.to_string(),
            operands,
        }))
    }

    /// The type this expression evaluates to.
    pub fn return_type(&self) -> Type {
        match self {
            Expr::Value(v) => v.ty,
            Expr::Param(p) => p.ty,
            Expr::Operator(op) => {
                // `let` is transparent: it returns whatever its body returns.
                if op.opcode == "let" {
                    if let Some(body) = op.operands.get(2) {
                        return body.return_type();
                    }
                }
                ops::contract(&op.opcode)
                    .map(|c| c.return_type)
                    // Opcode validated at construction.
                    .unwrap_or(Type::Any)
            }
        }
    }
}

/// Pre-order traversal over the expression tree.
///
/// The single sanctioned mechanism for free-variable collection and
/// validation: the visitor sees every node, operators before their operands.
pub fn walk<E>(expr: &Expr, visit: &mut impl FnMut(&Expr) -> Result<(), E>) -> Result<(), E> {
    visit(expr)?;
    if let Expr::Operator(op) = expr {
        for operand in &op.operands {
            walk(operand, visit)?;
        }
    }
    Ok(())
}

/// Evaluate an expression against a params bag.
///
/// Values evaluate to themselves, parameters resolve through the bag, and
/// operators dispatch to their registered eval function.
pub fn eval(expr: &Expr, params: &dyn Params) -> Result<Value, EvalError> {
    match expr {
        Expr::Value(v) => Ok(v.clone()),
        Expr::Param(p) => p.lookup(params),
        Expr::Operator(op) => ops::eval_operator(&op.opcode, &op.operands, params),
    }
}
