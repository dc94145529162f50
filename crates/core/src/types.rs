//! The type lattice shared by values, parameters and operator contracts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type tag carried by every value, parameter and contract term.
///
/// `Bool`, `String`, `Int64` and `Float64` are concrete: they are the only
/// tags that may appear on literal values and signatures. `Number` and `Any`
/// are abstract and only appear in operator contracts.
///
/// Subtyping: `Int64 ⊑ Number ⊑ Any`, `Float64 ⊑ Number ⊑ Any`,
/// `Bool ⊑ Any`, `String ⊑ Any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Bool,
    String,
    Int64,
    Float64,
    Number,
    Any,
}

impl Type {
    /// True for the four tags that literal values may carry.
    pub fn is_concrete(self) -> bool {
        !matches!(self, Type::Number | Type::Any)
    }

    /// Subtyping check: does `self` fulfil a slot of type `term`?
    pub fn fulfills(self, term: Type) -> bool {
        self == term
            || match term {
                Type::Any => true,
                Type::Number => matches!(self, Type::Int64 | Type::Float64),
                _ => false,
            }
    }

    /// The lexical name used on the wire and in the s-expression surface.
    pub fn name(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::String => "string",
            Type::Int64 => "int64",
            Type::Float64 => "float64",
            Type::Number => "number",
            Type::Any => "any",
        }
    }

    /// Resolve a concrete type from its lexical name. Abstract names are
    /// rejected: signatures and `let` declarations only take concrete types.
    pub fn concrete_from_name(name: &str) -> Option<Type> {
        match name {
            "bool" => Some(Type::Bool),
            "string" => Some(Type::String),
            "int64" => Some(Type::Int64),
            "float64" => Some(Type::Float64),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_types_fulfil_any() {
        for ty in [Type::Bool, Type::String, Type::Int64, Type::Float64] {
            assert!(ty.fulfills(Type::Any), "{ty} should fulfil any");
        }
    }

    #[test]
    fn numeric_types_fulfil_number() {
        assert!(Type::Int64.fulfills(Type::Number));
        assert!(Type::Float64.fulfills(Type::Number));
    }

    #[test]
    fn non_numeric_types_do_not_fulfil_number() {
        assert!(!Type::String.fulfills(Type::Number));
        assert!(!Type::Bool.fulfills(Type::Number));
    }

    #[test]
    fn fulfilment_is_reflexive() {
        for ty in [
            Type::Bool,
            Type::String,
            Type::Int64,
            Type::Float64,
            Type::Number,
            Type::Any,
        ] {
            assert!(ty.fulfills(ty));
        }
    }

    #[test]
    fn concrete_types_do_not_cross_fulfil() {
        assert!(!Type::Int64.fulfills(Type::Float64));
        assert!(!Type::Float64.fulfills(Type::Int64));
        assert!(!Type::Bool.fulfills(Type::String));
        assert!(!Type::Any.fulfills(Type::Bool));
    }

    #[test]
    fn concrete_name_round_trip() {
        for ty in [Type::Bool, Type::String, Type::Int64, Type::Float64] {
            assert_eq!(Type::concrete_from_name(ty.name()), Some(ty));
        }
        assert_eq!(Type::concrete_from_name("number"), None);
        assert_eq!(Type::concrete_from_name("any"), None);
        assert_eq!(Type::concrete_from_name("int"), None);
    }
}
