//! Rules, signatures and rulesets.
//!
//! A rule binds a boolean predicate to a result expression; a ruleset binds
//! a signature (parameter names → types, return type) to an ordered rule
//! list plus version metadata. Rulesets are immutable snapshots: a new
//! version is a whole new rule list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, EvalError};
use crate::expr::{eval, walk, Expr};
use crate::params::Params;
use crate::types::Type;
use crate::value::{is_identifier, Value};

/// A predicate→result pair. The predicate must be boolean; the result must
/// match the owning ruleset's return type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub expr: Expr,
    pub result: Expr,
}

impl Rule {
    pub fn new(expr: Expr, result: Expr) -> Rule {
        Rule { expr, result }
    }
}

/// The typing interface of a ruleset: what parameters callers must supply
/// and what type every rule returns. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub params: BTreeMap<String, Type>,
    pub return_type: Type,
}

impl Signature {
    pub fn new(params: BTreeMap<String, Type>, return_type: Type) -> Signature {
        Signature {
            params,
            return_type,
        }
    }

    /// Validate the signature itself: identifier param names, concrete
    /// types throughout.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.return_type.is_concrete() {
            return Err(Error::BadParam(format!(
                "return type cannot be abstract type {}",
                self.return_type
            )));
        }
        for (name, ty) in &self.params {
            if !is_identifier(name) {
                return Err(Error::BadParam(format!(
                    "{name:?} is not a valid parameter name"
                )));
            }
            if !ty.is_concrete() {
                return Err(Error::BadParam(format!(
                    "parameter {name:?} cannot have abstract type {ty}"
                )));
            }
        }
        Ok(())
    }

    /// Check a rule list against this signature, accumulating every
    /// violation rather than stopping at the first. Rules are numbered from
    /// one.
    ///
    /// Checks, per the service contract: the predicate returns bool, the
    /// result matches the return type, and every free parameter reference
    /// is declared with a matching type. Parameters introduced by `let`
    /// are not free.
    pub fn check_rules(&self, rules: &[Rule]) -> Result<(), Vec<Error>> {
        let mut errors = Vec::new();

        for (i, rule) in rules.iter().enumerate() {
            let number = i + 1;

            if rule.expr.return_type() != Type::Bool {
                errors.push(Error::SignatureMismatch {
                    rule: number,
                    message: format!(
                        "predicate must return bool, got {}",
                        rule.expr.return_type()
                    ),
                });
            }
            if rule.result.return_type() != self.return_type {
                errors.push(Error::SignatureMismatch {
                    rule: number,
                    message: format!(
                        "result must return {}, got {}",
                        self.return_type,
                        rule.result.return_type()
                    ),
                });
            }

            for expr in [&rule.expr, &rule.result] {
                if let Err(e) = self.check_free_params(expr, number) {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_free_params(&self, expr: &Expr, rule: usize) -> Result<(), Error> {
        // Names bound by a `let` anywhere in the tree are not free.
        let mut bound: Vec<String> = Vec::new();
        walk::<()>(expr, &mut |node| {
            if let Expr::Operator(op) = node {
                if op.opcode() == "let" {
                    if let Some(Expr::Param(p)) = op.operands().first() {
                        bound.push(p.name.clone());
                    }
                }
            }
            Ok(())
        })
        .ok();

        let mut result = Ok(());
        walk::<()>(expr, &mut |node| {
            if result.is_err() {
                return Ok(());
            }
            if let Expr::Param(p) = node {
                if bound.contains(&p.name) {
                    return Ok(());
                }
                match self.params.get(&p.name) {
                    None => {
                        result = Err(Error::UnknownParameter {
                            name: p.name.clone(),
                        });
                    }
                    Some(ty) if *ty != p.ty => {
                        result = Err(Error::SignatureMismatch {
                            rule,
                            message: format!(
                                "parameter {:?} is declared as {ty}, referenced as {}",
                                p.name, p.ty
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
            Ok(())
        })
        .ok();
        result
    }
}

/// One persisted version of a ruleset's rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetVersion {
    pub version: String,
    pub rules: Vec<Rule>,
}

/// A named, versioned list of rules plus its signature.
///
/// Service reads return snapshots: `versions` holds the requested version,
/// the latest one, or the full history depending on the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub path: String,
    pub signature: Signature,
    #[serde(default)]
    pub versions: Vec<RulesetVersion>,
}

impl Ruleset {
    pub fn latest(&self) -> Option<&RulesetVersion> {
        self.versions.last()
    }
}

/// The outcome of evaluating a ruleset: the first matching rule's result
/// and the version it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub value: Value,
    pub version: String,
}

/// Walk the rules in order and return the result of the first rule whose
/// predicate evaluates to true. Errors short-circuit; no predicate matching
/// is `NoMatch`.
pub fn eval_rules(rules: &[Rule], params: &dyn Params) -> Result<Value, EvalError> {
    for rule in rules {
        let decision = eval(&rule.expr, params)?;
        if decision.ty != Type::Bool {
            return Err(EvalError::TypeMismatch {
                expected: Type::Bool,
                got: decision.ty,
            });
        }
        if decision.is_true() {
            return eval(&rule.result, params);
        }
    }
    Err(EvalError::NoMatch)
}
