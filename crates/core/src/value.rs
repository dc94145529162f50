//! Leaf nodes of the expression tree: literal values and parameter lookups.

use std::cmp::Ordering;

use crate::error::{Error, EvalError};
use crate::types::Type;

/// A literal value, the result type of every evaluation.
///
/// `data` is the lexical encoding of the value: `"true"`/`"false"` for
/// booleans, a signed decimal for integers, a decimal with six fractional
/// digits for floats, the raw text for strings. Two values are equal iff
/// both fields match byte for byte; ordering is defined only between values
/// of the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub ty: Type,
    pub data: String,
}

impl Value {
    /// Build a value from a type tag and lexical data, validating the
    /// encoding. Abstract types never carry data.
    pub fn new(ty: Type, data: impl Into<String>) -> Result<Value, Error> {
        let data = data.into();
        let ok = match ty {
            Type::Bool => matches!(data.as_str(), "true" | "false"),
            Type::String => true,
            Type::Int64 => data.parse::<i64>().is_ok(),
            Type::Float64 => is_float_literal(&data),
            Type::Number | Type::Any => false,
        };
        if !ok {
            return Err(Error::BadLiteral { ty, data });
        }
        Ok(Value { ty, data })
    }

    pub fn bool(value: bool) -> Value {
        Value {
            ty: Type::Bool,
            data: if value { "true" } else { "false" }.to_string(),
        }
    }

    pub fn string(value: impl Into<String>) -> Value {
        Value {
            ty: Type::String,
            data: value.into(),
        }
    }

    pub fn int64(value: i64) -> Value {
        Value {
            ty: Type::Int64,
            data: value.to_string(),
        }
    }

    /// Floats are rendered with exactly six fractional digits so that equal
    /// numbers have equal lexical encodings.
    pub fn float64(value: f64) -> Value {
        Value {
            ty: Type::Float64,
            data: format!("{value:.6}"),
        }
    }

    pub fn is_true(&self) -> bool {
        self.ty == Type::Bool && self.data == "true"
    }

    pub fn gt(&self, other: &Value) -> Result<bool, EvalError> {
        Ok(self.compare(other)? == Ordering::Greater)
    }

    pub fn gte(&self, other: &Value) -> Result<bool, EvalError> {
        Ok(self.compare(other)? != Ordering::Less)
    }

    pub fn lt(&self, other: &Value) -> Result<bool, EvalError> {
        Ok(self.compare(other)? == Ordering::Less)
    }

    pub fn lte(&self, other: &Value) -> Result<bool, EvalError> {
        Ok(self.compare(other)? != Ordering::Greater)
    }

    /// Total order within a type: natural for numbers, lexicographic for
    /// strings, `false < true` for booleans. Comparing values of different
    /// types is a `TypeMismatch`.
    fn compare(&self, other: &Value) -> Result<Ordering, EvalError> {
        if self.ty != other.ty {
            return Err(EvalError::TypeMismatch {
                expected: self.ty,
                got: other.ty,
            });
        }
        match self.ty {
            Type::Bool => {
                let a = parse_bool(&self.data)?;
                let b = parse_bool(&other.data)?;
                Ok(a.cmp(&b))
            }
            Type::String => Ok(self.data.cmp(&other.data)),
            Type::Int64 => {
                let a = parse_int64(&self.data)?;
                let b = parse_int64(&other.data)?;
                Ok(a.cmp(&b))
            }
            Type::Float64 => {
                let a = parse_float64(&self.data)?;
                let b = parse_float64(&other.data)?;
                a.partial_cmp(&b)
                    .ok_or_else(|| EvalError::Arithmetic(format!("cannot order {a} and {b}")))
            }
            Type::Number | Type::Any => Err(EvalError::InvalidExpression(format!(
                "abstract type {} on a value",
                self.ty
            ))),
        }
    }
}

/// A reference to a caller-supplied parameter, resolved at eval time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ty: Type,
    pub name: String,
}

impl Param {
    /// Declare a parameter of a concrete type under a non-empty identifier.
    pub fn new(ty: Type, name: impl Into<String>) -> Result<Param, Error> {
        let name = name.into();
        if !ty.is_concrete() {
            return Err(Error::BadParam(format!(
                "parameter {name:?} cannot have abstract type {ty}"
            )));
        }
        if !is_identifier(&name) {
            return Err(Error::BadParam(format!(
                "{name:?} is not a valid parameter name"
            )));
        }
        Ok(Param { ty, name })
    }

    /// Look the parameter up in the bag and wrap it as a value.
    pub fn lookup(&self, params: &dyn crate::params::Params) -> Result<Value, EvalError> {
        match self.ty {
            Type::String => params.get_string(&self.name).map(Value::string),
            Type::Bool => params.get_bool(&self.name).map(Value::bool),
            Type::Int64 => params.get_int64(&self.name).map(Value::int64),
            Type::Float64 => params.get_float64(&self.name).map(Value::float64),
            Type::Number | Type::Any => Err(EvalError::InvalidExpression(format!(
                "abstract type {} on a parameter",
                self.ty
            ))),
        }
    }
}

/// Identifiers start with a letter or underscore and continue with letters,
/// digits, underscores or dashes.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Accepts an optional sign, an integer part, and an optional dot with a
/// fractional part. No exponents, no infinities.
fn is_float_literal(data: &str) -> bool {
    let rest = data.strip_prefix('-').unwrap_or(data);
    let mut parts = rest.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match parts.next() {
        None => true,
        Some(frac) => !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()),
    }
}

pub(crate) fn parse_bool(data: &str) -> Result<bool, EvalError> {
    match data {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(EvalError::Arithmetic(format!("invalid bool {other:?}"))),
    }
}

pub(crate) fn parse_int64(data: &str) -> Result<i64, EvalError> {
    data.parse::<i64>()
        .map_err(|_| EvalError::Arithmetic(format!("invalid int64 {data:?}")))
}

pub(crate) fn parse_float64(data: &str) -> Result<f64, EvalError> {
    data.parse::<f64>()
        .map_err(|_| EvalError::Arithmetic(format!("invalid float64 {data:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_validation() {
        assert!(Value::new(Type::Bool, "true").is_ok());
        assert!(Value::new(Type::Bool, "True").is_err());
        assert!(Value::new(Type::Int64, "-42").is_ok());
        assert!(Value::new(Type::Int64, "4.2").is_err());
        assert!(Value::new(Type::Float64, "-3.140000").is_ok());
        assert!(Value::new(Type::Float64, "3.").is_err());
        assert!(Value::new(Type::Float64, "nan").is_err());
        assert!(Value::new(Type::String, "anything at all").is_ok());
        assert!(Value::new(Type::Number, "1").is_err());
        assert!(Value::new(Type::Any, "1").is_err());
    }

    #[test]
    fn float_rendering_is_fixed_precision() {
        assert_eq!(Value::float64(-3.14).data, "-3.140000");
        assert_eq!(Value::float64(1.0).data, "1.000000");
    }

    #[test]
    fn equality_is_byte_for_byte() {
        assert_eq!(Value::int64(1), Value::int64(1));
        assert_ne!(Value::int64(1), Value::string("1"));
        assert_ne!(Value::float64(1.0), Value::int64(1));
    }

    #[test]
    fn ordering_within_types() {
        assert!(Value::int64(10).gt(&Value::int64(9)).unwrap());
        assert!(Value::float64(1.5).lt(&Value::float64(2.0)).unwrap());
        assert!(Value::string("abc").lt(&Value::string("abd")).unwrap());
        // false < true
        assert!(Value::bool(false).lt(&Value::bool(true)).unwrap());
        assert!(Value::bool(true).gte(&Value::bool(true)).unwrap());
    }

    #[test]
    fn ordering_rejects_mixed_types() {
        let err = Value::int64(5).gt(&Value::string("10")).unwrap_err();
        assert_eq!(
            err,
            EvalError::TypeMismatch {
                expected: Type::Int64,
                got: Type::String,
            }
        );
    }

    #[test]
    fn param_names_are_identifiers() {
        assert!(Param::new(Type::Int64, "my-param").is_ok());
        assert!(Param::new(Type::Int64, "_hidden").is_ok());
        assert!(Param::new(Type::Int64, "").is_err());
        assert!(Param::new(Type::Int64, "1st").is_err());
        assert!(Param::new(Type::Number, "n").is_err());
    }
}
