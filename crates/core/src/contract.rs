//! Operator contracts: the structural type system for operator application.

use crate::error::Error;
use crate::types::Type;

/// How many operands a contract term accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one operand.
    One,
    /// A tail of zero or more operands. At most one term may be `Many`,
    /// and it must be the last.
    Many,
}

/// One positional slot in an operator contract.
///
/// `is_body` marks a term that is evaluated in a nested scope (`let`); it is
/// not part of term identity.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Term {
    pub ty: Type,
    pub cardinality: Cardinality,
    pub is_body: bool,
}

impl Term {
    pub fn one(ty: Type) -> Term {
        Term {
            ty,
            cardinality: Cardinality::One,
            is_body: false,
        }
    }

    pub fn many(ty: Type) -> Term {
        Term {
            ty,
            cardinality: Cardinality::Many,
            is_body: false,
        }
    }

    pub fn body(ty: Type) -> Term {
        Term {
            ty,
            cardinality: Cardinality::One,
            is_body: true,
        }
    }

    /// True iff an operand of `candidate` type may fill this slot.
    pub fn is_fulfilled_by(&self, candidate: Type) -> bool {
        candidate.fulfills(self.ty)
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Term) -> bool {
        self.ty == other.ty && self.cardinality == other.cardinality
    }
}

/// An operator's typing discipline: its return type plus an ordered list of
/// terms describing the accepted operand positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub opcode: &'static str,
    pub return_type: Type,
    pub terms: Vec<Term>,
}

impl Contract {
    pub fn new(opcode: &'static str, return_type: Type, terms: Vec<Term>) -> Contract {
        Contract {
            opcode,
            return_type,
            terms,
        }
    }

    /// Check an operand type sequence against this contract.
    ///
    /// The terms split into a fixed head and an optional `Many` tail. Each
    /// fixed operand must fulfil its term in order; every remaining operand
    /// must fulfil the tail term, and without a tail the operand count must
    /// equal the fixed term count.
    pub fn check(&self, operands: &[Type]) -> Result<(), Error> {
        let (fixed, tail) = match self.terms.split_last() {
            Some((last, head)) if last.cardinality == Cardinality::Many => (head, Some(last)),
            _ => (self.terms.as_slice(), None),
        };

        if operands.len() < fixed.len() {
            return Err(self.violation(operands.len(), fixed[operands.len()].ty, "no operand"));
        }

        for (i, (term, ty)) in fixed.iter().zip(operands).enumerate() {
            if !term.is_fulfilled_by(*ty) {
                return Err(self.violation(i, term.ty, ty.name()));
            }
        }

        match tail {
            Some(term) => {
                for (i, ty) in operands.iter().enumerate().skip(fixed.len()) {
                    if !term.is_fulfilled_by(*ty) {
                        return Err(self.violation(self.terms.len() - 1, term.ty, ty.name()));
                    }
                }
            }
            None => {
                if operands.len() > fixed.len() {
                    return Err(self.violation(
                        fixed.len().saturating_sub(1),
                        fixed.last().map(|t| t.ty).unwrap_or(Type::Any),
                        &format!("{} extra operand(s)", operands.len() - fixed.len()),
                    ));
                }
            }
        }

        Ok(())
    }

    fn violation(&self, term_index: usize, expected: Type, got: &str) -> Error {
        Error::ContractViolation {
            opcode: self.opcode.to_string(),
            term_index,
            expected,
            got: got.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_contract() -> Contract {
        // Shape used by the variadic comparison operators.
        Contract::new(
            "test",
            Type::Bool,
            vec![Term::one(Type::Bool), Term::one(Type::Bool), Term::many(Type::Bool)],
        )
    }

    #[test]
    fn term_fulfilment_follows_the_lattice() {
        assert!(Term::one(Type::Number).is_fulfilled_by(Type::Int64));
        assert!(Term::one(Type::Number).is_fulfilled_by(Type::Float64));
        assert!(!Term::one(Type::Number).is_fulfilled_by(Type::String));
        assert!(Term::one(Type::Any).is_fulfilled_by(Type::Bool));
        assert!(Term::one(Type::Any).is_fulfilled_by(Type::String));
        assert!(Term::one(Type::Bool).is_fulfilled_by(Type::Bool));
        assert!(!Term::one(Type::Bool).is_fulfilled_by(Type::Int64));
    }

    #[test]
    fn term_identity_ignores_the_body_flag() {
        assert_eq!(Term::one(Type::Any), Term::body(Type::Any));
        assert_ne!(Term::one(Type::String), Term::one(Type::Bool));
        assert_ne!(Term::one(Type::String), Term::many(Type::String));
        assert_ne!(Term::one(Type::Bool), Term::many(Type::Bool));
    }

    #[test]
    fn check_accepts_minimum_and_tail() {
        let c = chain_contract();
        assert!(c.check(&[Type::Bool, Type::Bool]).is_ok());
        assert!(c.check(&[Type::Bool, Type::Bool, Type::Bool, Type::Bool]).is_ok());
    }

    #[test]
    fn check_reports_missing_operand() {
        let c = chain_contract();
        let err = c.check(&[Type::Bool]).unwrap_err();
        match err {
            Error::ContractViolation { term_index, got, .. } => {
                assert_eq!(term_index, 1);
                assert_eq!(got, "no operand");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn check_pinpoints_the_offending_term() {
        let c = chain_contract();
        let err = c.check(&[Type::Bool, Type::Int64]).unwrap_err();
        match err {
            Error::ContractViolation {
                term_index,
                expected,
                ..
            } => {
                assert_eq!(term_index, 1);
                assert_eq!(expected, Type::Bool);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // A bad tail operand blames the tail term.
        let err = c.check(&[Type::Bool, Type::Bool, Type::String]).unwrap_err();
        match err {
            Error::ContractViolation { term_index, .. } => assert_eq!(term_index, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn check_rejects_extra_operands_without_a_tail() {
        let c = Contract::new("unary", Type::Bool, vec![Term::one(Type::Bool)]);
        assert!(c.check(&[Type::Bool]).is_ok());
        assert!(c.check(&[Type::Bool, Type::Bool]).is_err());
    }
}
