//! Parameter bags: the caller-supplied name→value mappings consumed at
//! eval time.
//!
//! The kernel only sees the [`Params`] trait. Hosts provide a typed bag
//! ([`ParamBag`]); the HTTP façade provides a string-valued bag that parses
//! on demand ([`StringParams`]); `let` provides an immutable stack frame
//! ([`ScopedParams`]) that shadows its parent for a single name.

use std::collections::BTreeMap;

use crate::error::EvalError;
use crate::types::Type;
use crate::value::{parse_bool, parse_float64, parse_int64, Value};

/// Typed access to evaluation parameters.
pub trait Params {
    fn get_string(&self, name: &str) -> Result<String, EvalError>;
    fn get_bool(&self, name: &str) -> Result<bool, EvalError>;
    fn get_int64(&self, name: &str) -> Result<i64, EvalError>;
    fn get_float64(&self, name: &str) -> Result<f64, EvalError>;
    /// All names visible in this bag, including parent scopes.
    fn keys(&self) -> Vec<String>;
    /// The lexical encoding of the named value.
    fn encode_value(&self, name: &str) -> Result<String, EvalError>;
}

/// A single typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Bool(bool),
    Int64(i64),
    Float64(f64),
}

impl ParamValue {
    pub fn ty(&self) -> Type {
        match self {
            ParamValue::String(_) => Type::String,
            ParamValue::Bool(_) => Type::Bool,
            ParamValue::Int64(_) => Type::Int64,
            ParamValue::Float64(_) => Type::Float64,
        }
    }

    /// Convert an evaluated value into a bag entry.
    pub fn from_value(value: &Value) -> Result<ParamValue, EvalError> {
        Ok(match value.ty {
            Type::String => ParamValue::String(value.data.clone()),
            Type::Bool => ParamValue::Bool(parse_bool(&value.data)?),
            Type::Int64 => ParamValue::Int64(parse_int64(&value.data)?),
            Type::Float64 => ParamValue::Float64(parse_float64(&value.data)?),
            other => {
                return Err(EvalError::InvalidExpression(format!(
                    "abstract type {other} on a value"
                )))
            }
        })
    }

    fn encode(&self) -> String {
        match self {
            ParamValue::String(s) => s.clone(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int64(i) => i.to_string(),
            ParamValue::Float64(f) => format!("{f:.6}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float64(v)
    }
}

/// The standard typed parameter bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBag {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBag {
    pub fn new() -> ParamBag {
        ParamBag::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> ParamBag {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    fn get(&self, name: &str) -> Result<&ParamValue, EvalError> {
        self.values.get(name).ok_or_else(|| EvalError::ParamNotFound {
            name: name.to_string(),
        })
    }
}

impl Params for ParamBag {
    fn get_string(&self, name: &str) -> Result<String, EvalError> {
        match self.get(name)? {
            ParamValue::String(s) => Ok(s.clone()),
            _ => Err(mismatch(name, Type::String)),
        }
    }

    fn get_bool(&self, name: &str) -> Result<bool, EvalError> {
        match self.get(name)? {
            ParamValue::Bool(b) => Ok(*b),
            _ => Err(mismatch(name, Type::Bool)),
        }
    }

    fn get_int64(&self, name: &str) -> Result<i64, EvalError> {
        match self.get(name)? {
            ParamValue::Int64(i) => Ok(*i),
            _ => Err(mismatch(name, Type::Int64)),
        }
    }

    fn get_float64(&self, name: &str) -> Result<f64, EvalError> {
        match self.get(name)? {
            ParamValue::Float64(f) => Ok(*f),
            _ => Err(mismatch(name, Type::Float64)),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn encode_value(&self, name: &str) -> Result<String, EvalError> {
        Ok(self.get(name)?.encode())
    }
}

/// A bag of raw strings parsed on demand, for callers that only have the
/// lexical form (URL query parameters).
#[derive(Debug, Clone, Default)]
pub struct StringParams {
    values: BTreeMap<String, String>,
}

impl StringParams {
    pub fn new() -> StringParams {
        StringParams::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    fn get(&self, name: &str) -> Result<&str, EvalError> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| EvalError::ParamNotFound {
                name: name.to_string(),
            })
    }
}

impl FromIterator<(String, String)> for StringParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        StringParams {
            values: iter.into_iter().collect(),
        }
    }
}

impl Params for StringParams {
    fn get_string(&self, name: &str) -> Result<String, EvalError> {
        Ok(self.get(name)?.to_string())
    }

    fn get_bool(&self, name: &str) -> Result<bool, EvalError> {
        parse_bool(self.get(name)?).map_err(|_| mismatch(name, Type::Bool))
    }

    fn get_int64(&self, name: &str) -> Result<i64, EvalError> {
        parse_int64(self.get(name)?).map_err(|_| mismatch(name, Type::Int64))
    }

    fn get_float64(&self, name: &str) -> Result<f64, EvalError> {
        parse_float64(self.get(name)?).map_err(|_| mismatch(name, Type::Float64))
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn encode_value(&self, name: &str) -> Result<String, EvalError> {
        Ok(self.get(name)?.to_string())
    }
}

/// One immutable scope frame introduced by `let`.
///
/// A lookup first checks the local binding, then delegates to the parent.
/// Each `let` evaluation owns its own frame; the parent bag is never
/// mutated.
pub struct ScopedParams<'a> {
    name: &'a str,
    value: ParamValue,
    parent: &'a dyn Params,
}

impl<'a> ScopedParams<'a> {
    pub fn new(name: &'a str, value: ParamValue, parent: &'a dyn Params) -> ScopedParams<'a> {
        ScopedParams {
            name,
            value,
            parent,
        }
    }

    fn local(&self, name: &str, expected: Type) -> Option<Result<&ParamValue, EvalError>> {
        if name != self.name {
            return None;
        }
        if self.value.ty() != expected {
            return Some(Err(mismatch(name, expected)));
        }
        Some(Ok(&self.value))
    }
}

impl Params for ScopedParams<'_> {
    fn get_string(&self, name: &str) -> Result<String, EvalError> {
        match self.local(name, Type::String) {
            Some(v) => match v? {
                ParamValue::String(s) => Ok(s.clone()),
                _ => Err(mismatch(name, Type::String)),
            },
            None => self.parent.get_string(name),
        }
    }

    fn get_bool(&self, name: &str) -> Result<bool, EvalError> {
        match self.local(name, Type::Bool) {
            Some(v) => match v? {
                ParamValue::Bool(b) => Ok(*b),
                _ => Err(mismatch(name, Type::Bool)),
            },
            None => self.parent.get_bool(name),
        }
    }

    fn get_int64(&self, name: &str) -> Result<i64, EvalError> {
        match self.local(name, Type::Int64) {
            Some(v) => match v? {
                ParamValue::Int64(i) => Ok(*i),
                _ => Err(mismatch(name, Type::Int64)),
            },
            None => self.parent.get_int64(name),
        }
    }

    fn get_float64(&self, name: &str) -> Result<f64, EvalError> {
        match self.local(name, Type::Float64) {
            Some(v) => match v? {
                ParamValue::Float64(f) => Ok(*f),
                _ => Err(mismatch(name, Type::Float64)),
            },
            None => self.parent.get_float64(name),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = self.parent.keys();
        keys.push(self.name.to_string());
        keys
    }

    fn encode_value(&self, name: &str) -> Result<String, EvalError> {
        if name == self.name {
            return Ok(self.value.encode());
        }
        self.parent.encode_value(name)
    }
}

fn mismatch(name: &str, expected: Type) -> EvalError {
    EvalError::ParamTypeMismatch {
        name: name.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_getters_return_typed_values() {
        let p = ParamBag::new()
            .with("string", "string")
            .with("bool", true)
            .with("int64", 42i64)
            .with("float64", 42.42);

        assert_eq!(p.get_string("string").unwrap(), "string");
        assert!(p.get_bool("bool").unwrap());
        assert_eq!(p.get_int64("int64").unwrap(), 42);
        assert_eq!(p.get_float64("float64").unwrap(), 42.42);
    }

    #[test]
    fn bag_getters_report_not_found() {
        let p = ParamBag::new().with("string", "string");
        assert_eq!(
            p.get_string("badkey").unwrap_err(),
            EvalError::ParamNotFound {
                name: "badkey".to_string()
            }
        );
    }

    #[test]
    fn bag_getters_report_type_mismatch() {
        let p = ParamBag::new().with("bool", true).with("string", "string");
        assert_eq!(
            p.get_string("bool").unwrap_err(),
            EvalError::ParamTypeMismatch {
                name: "bool".to_string(),
                expected: Type::String,
            }
        );
        assert!(p.get_bool("string").is_err());
        assert!(p.get_int64("string").is_err());
        assert!(p.get_float64("string").is_err());
    }

    #[test]
    fn encode_value_uses_lexical_forms() {
        let p = ParamBag::new().with("f", 1.5).with("b", false);
        assert_eq!(p.encode_value("f").unwrap(), "1.500000");
        assert_eq!(p.encode_value("b").unwrap(), "false");
    }

    #[test]
    fn string_params_parse_on_demand() {
        let mut p = StringParams::new();
        p.insert("age", "30");
        p.insert("vip", "true");
        assert_eq!(p.get_int64("age").unwrap(), 30);
        assert!(p.get_bool("vip").unwrap());
        assert_eq!(p.get_string("age").unwrap(), "30");
        assert!(matches!(
            p.get_int64("vip").unwrap_err(),
            EvalError::ParamTypeMismatch { .. }
        ));
    }

    #[test]
    fn scoped_params_shadow_and_delegate() {
        let parent = ParamBag::new().with("outer", 1i64);
        let scope = ScopedParams::new("inner", ParamValue::Int64(2), &parent);
        assert_eq!(scope.get_int64("inner").unwrap(), 2);
        assert_eq!(scope.get_int64("outer").unwrap(), 1);
        assert!(matches!(
            scope.get_int64("gone").unwrap_err(),
            EvalError::ParamNotFound { .. }
        ));
        // The local binding hides nothing of a different name, but a typed
        // lookup under the bound name must match the bound type.
        assert!(matches!(
            scope.get_string("inner").unwrap_err(),
            EvalError::ParamTypeMismatch { .. }
        ));
        assert!(scope.keys().contains(&"inner".to_string()));
        assert!(scope.keys().contains(&"outer".to_string()));
    }
}
