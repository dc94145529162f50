//! decree-core: the Decree expression kernel.
//!
//! Provides the typed expression tree (values, parameters, operator
//! applications), the contract-based structural type system that validates
//! operator use, the built-in operator registry, the s-expression authoring
//! surface, and the rule/ruleset model shared by the storage layer and the
//! HTTP façade.
//!
//! Everything here is pure and CPU-bound: parsing, contract checking and
//! evaluation never suspend, share no mutable state, and are safe to run
//! concurrently over read-only ruleset snapshots.

use std::collections::BTreeMap;

pub mod contract;
pub mod error;
pub mod expr;
pub mod json;
pub mod ops;
pub mod params;
pub mod ruleset;
pub mod sexpr;
pub mod types;
pub mod value;

// ── Convenience re-exports: key types ────────────────────────────────

pub use contract::{Cardinality, Contract, Term};
pub use error::{Error, EvalError};
pub use expr::{eval, walk, Expr, Operator};
pub use params::{ParamBag, ParamValue, Params, ScopedParams, StringParams};
pub use ruleset::{eval_rules, EvalResult, Rule, Ruleset, RulesetVersion, Signature};
pub use types::Type;
pub use value::{Param, Value};

/// A parameter scope: names mapped to their declared concrete types.
pub type Parameters = BTreeMap<String, Type>;

/// The contract of a registered operator, for inspection by parsers and
/// tooling.
pub fn operator_contract(opcode: &str) -> Option<&'static Contract> {
    ops::contract(opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_contract_exposes_registered_opcodes() {
        let contract = operator_contract("eq").unwrap();
        assert_eq!(contract.opcode, "eq");
        assert_eq!(contract.return_type, Type::Bool);
        assert!(operator_contract("dave").is_none());
    }

    #[test]
    fn contracts_are_inspectable_for_every_builtin() {
        for opcode in [
            "not",
            "and",
            "or",
            "eq",
            "in",
            "gt",
            "gte",
            "lt",
            "lte",
            "fnv",
            "percentile",
            "let",
        ] {
            assert!(operator_contract(opcode).is_some(), "{opcode} missing");
        }
    }
}
