//! The built-in operator registry.
//!
//! A single process-wide immutable table maps each opcode to its typing
//! contract and its eval function. The table is populated on first use and
//! read-only thereafter; there is no runtime registration and no plugin
//! surface.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::contract::{Contract, Term};
use crate::error::EvalError;
use crate::expr::{eval, Expr};
use crate::params::{Params, ParamValue, ScopedParams};
use crate::types::Type;
use crate::value::{parse_int64, Value};

type EvalFn = fn(&[Expr], &dyn Params) -> Result<Value, EvalError>;

struct OpSpec {
    contract: Contract,
    eval: EvalFn,
}

fn registry() -> &'static HashMap<&'static str, OpSpec> {
    static REGISTRY: OnceLock<HashMap<&'static str, OpSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut ops = HashMap::new();

        let mut register = |opcode: &'static str, return_type, terms, eval: EvalFn| {
            ops.insert(
                opcode,
                OpSpec {
                    contract: Contract::new(opcode, return_type, terms),
                    eval,
                },
            );
        };

        register("not", Type::Bool, vec![Term::one(Type::Bool)], eval_not);
        register(
            "and",
            Type::Bool,
            vec![Term::one(Type::Bool), Term::one(Type::Bool), Term::many(Type::Bool)],
            eval_and,
        );
        register(
            "or",
            Type::Bool,
            vec![Term::one(Type::Bool), Term::one(Type::Bool), Term::many(Type::Bool)],
            eval_or,
        );
        register("eq", Type::Bool, variadic_any(), eval_eq);
        register("in", Type::Bool, variadic_any(), eval_in);
        register("gt", Type::Bool, variadic_any(), |ops, p| eval_chain(ops, p, Value::gt));
        register("gte", Type::Bool, variadic_any(), |ops, p| eval_chain(ops, p, Value::gte));
        register("lt", Type::Bool, variadic_any(), |ops, p| eval_chain(ops, p, Value::lt));
        register("lte", Type::Bool, variadic_any(), |ops, p| eval_chain(ops, p, Value::lte));
        register("fnv", Type::Int64, vec![Term::one(Type::Any)], eval_fnv);
        register(
            "percentile",
            Type::Bool,
            vec![Term::one(Type::Any), Term::one(Type::Int64)],
            eval_percentile,
        );
        register(
            "let",
            Type::Any,
            vec![Term::one(Type::Any), Term::one(Type::Any), Term::body(Type::Any)],
            eval_let,
        );

        ops
    })
}

fn variadic_any() -> Vec<Term> {
    vec![Term::one(Type::Any), Term::one(Type::Any), Term::many(Type::Any)]
}

/// The contract of a registered operator, if any. Used by the constructor,
/// the parser and the return-type computation.
pub fn contract(opcode: &str) -> Option<&'static Contract> {
    registry().get(opcode).map(|spec| &spec.contract)
}

/// Dispatch an operator application to its registered eval function.
pub(crate) fn eval_operator(
    opcode: &str,
    operands: &[Expr],
    params: &dyn Params,
) -> Result<Value, EvalError> {
    let spec = registry()
        .get(opcode)
        .ok_or_else(|| EvalError::InvalidExpression(format!("no operator {opcode:?} exists")))?;
    (spec.eval)(operands, params)
}

// ── Boolean operators ─────────────────────────────────────────────────

fn eval_bool_operand(operand: &Expr, params: &dyn Params) -> Result<Value, EvalError> {
    let v = eval(operand, params)?;
    if v.ty != Type::Bool {
        return Err(EvalError::TypeMismatch {
            expected: Type::Bool,
            got: v.ty,
        });
    }
    Ok(v)
}

fn eval_not(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let v = eval_bool_operand(&operands[0], params)?;
    Ok(Value::bool(!v.is_true()))
}

/// Short-circuit left to right: the first false decides, operands after it
/// are never evaluated.
fn eval_and(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let mut last = eval_bool_operand(&operands[0], params)?;
    if !last.is_true() {
        return Ok(last);
    }
    for operand in &operands[1..] {
        last = eval_bool_operand(operand, params)?;
        if !last.is_true() {
            return Ok(last);
        }
    }
    Ok(last)
}

/// Short-circuit left to right: the first true decides.
fn eval_or(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let mut last = eval_bool_operand(&operands[0], params)?;
    if last.is_true() {
        return Ok(last);
    }
    for operand in &operands[1..] {
        last = eval_bool_operand(operand, params)?;
        if last.is_true() {
            return Ok(last);
        }
    }
    Ok(last)
}

// ── Equality and membership ───────────────────────────────────────────

fn eval_eq(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let first = eval(&operands[0], params)?;
    for operand in &operands[1..] {
        if eval(operand, params)? != first {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

fn eval_in(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let needle = eval(&operands[0], params)?;
    for operand in &operands[1..] {
        if eval(operand, params)? == needle {
            return Ok(Value::bool(true));
        }
    }
    Ok(Value::bool(false))
}

// ── Ordering ──────────────────────────────────────────────────────────

/// Chain comparison: true iff every adjacent pair satisfies the relation.
/// The relation itself rejects mixed operand types.
fn eval_chain(
    operands: &[Expr],
    params: &dyn Params,
    rel: fn(&Value, &Value) -> Result<bool, EvalError>,
) -> Result<Value, EvalError> {
    let mut prev = eval(&operands[0], params)?;
    for operand in &operands[1..] {
        let next = eval(operand, params)?;
        if !rel(&prev, &next)? {
            return Ok(Value::bool(false));
        }
        prev = next;
    }
    Ok(Value::bool(true))
}

// ── Hashing and bucketing ─────────────────────────────────────────────

/// FNV-1, 32-bit. The original Fowler–Noll–Vo function: multiply by the
/// prime, then xor the octet.
fn fnv1_32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash = hash.wrapping_mul(16_777_619);
        hash ^= u32::from(b);
    }
    hash
}

fn eval_fnv(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let v = eval(&operands[0], params)?;
    Ok(Value::int64(i64::from(fnv1_32(v.data.as_bytes()))))
}

/// Deterministic bucketing: true iff the operand hashes into the requested
/// percentile.
fn eval_percentile(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let v = eval(&operands[0], params)?;
    let hash = i64::from(fnv1_32(v.data.as_bytes()));
    let p = eval(&operands[1], params)?;
    if p.ty != Type::Int64 {
        return Err(EvalError::TypeMismatch {
            expected: Type::Int64,
            got: p.ty,
        });
    }
    let p = parse_int64(&p.data)?;
    Ok(Value::bool(hash % 100 <= p))
}

// ── Scoping ───────────────────────────────────────────────────────────

/// Bind a new parameter for the duration of the body form.
///
/// The binding symbol in position 0 is never evaluated; the value form in
/// position 1 is evaluated in the outer scope; the body in position 2 sees
/// a fresh frame that shadows the outer bag with the new name.
fn eval_let(operands: &[Expr], params: &dyn Params) -> Result<Value, EvalError> {
    let binding = match &operands[0] {
        Expr::Param(p) => p,
        _ => {
            return Err(EvalError::InvalidExpression(
                "let binding must be a parameter".to_string(),
            ))
        }
    };

    if params.keys().iter().any(|k| k == &binding.name) {
        return Err(EvalError::ParamAlreadyDefined {
            name: binding.name.clone(),
        });
    }

    let value = eval(&operands[1], params)?;
    if value.ty != binding.ty {
        return Err(EvalError::TypeMismatch {
            expected: binding.ty,
            got: value.ty,
        });
    }

    let scope = ScopedParams::new(&binding.name, ParamValue::from_value(&value)?, params);
    eval(&operands[2], &scope)
}
