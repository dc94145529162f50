//! JSON interchange encoding of expressions.
//!
//! Every node is an object with a `kind` discriminator: `"value"` carries
//! `type` + `data`, `"param"` carries `type` + `name`, and any other kind
//! names an operator and carries `operands`. Deserialization re-validates
//! operator nodes through the registry, so a decoded tree is as well-typed
//! as a constructed one.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::expr::Expr;
use crate::types::Type;
use crate::value::{Param, Value};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("kind", "value")?;
        map.serialize_entry("type", &self.ty)?;
        map.serialize_entry("data", &self.data)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let node = serde_json::Value::deserialize(deserializer)?;
        value_from_json(&node).map_err(D::Error::custom)
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expr::Value(v) => v.serialize(serializer),
            Expr::Param(p) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("kind", "param")?;
                map.serialize_entry("type", &p.ty)?;
                map.serialize_entry("name", &p.name)?;
                map.end()
            }
            Expr::Operator(op) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("kind", op.opcode())?;
                map.serialize_entry("operands", op.operands())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let node = serde_json::Value::deserialize(deserializer)?;
        expr_from_json(&node).map_err(D::Error::custom)
    }
}

fn kind_of(node: &serde_json::Value) -> Result<&str, Error> {
    node.get("kind")
        .and_then(|k| k.as_str())
        .ok_or_else(|| Error::Encoding("node has no \"kind\"".to_string()))
}

fn type_of(node: &serde_json::Value) -> Result<Type, Error> {
    let name = str_field(node, "type")?;
    Type::concrete_from_name(name)
        .ok_or_else(|| Error::Encoding(format!("unknown type {name:?}")))
}

fn str_field<'a>(node: &'a serde_json::Value, field: &str) -> Result<&'a str, Error> {
    node.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Encoding(format!("node has no string field {field:?}")))
}

fn value_from_json(node: &serde_json::Value) -> Result<Value, Error> {
    let kind = kind_of(node)?;
    if kind != "value" {
        return Err(Error::Encoding(format!(
            "expected a value node, got kind {kind:?}"
        )));
    }
    Value::new(type_of(node)?, str_field(node, "data")?)
}

/// Decode an expression node, dispatching on its `kind`.
pub fn expr_from_json(node: &serde_json::Value) -> Result<Expr, Error> {
    match kind_of(node)? {
        "value" => Ok(Expr::Value(value_from_json(node)?)),
        "param" => Ok(Expr::Param(Param::new(
            type_of(node)?,
            str_field(node, "name")?,
        )?)),
        opcode => {
            let raw = node
                .get("operands")
                .and_then(|o| o.as_array())
                .ok_or_else(|| {
                    Error::Encoding(format!("operator {opcode:?} has no \"operands\" array"))
                })?;
            let operands = raw
                .iter()
                .map(expr_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            Expr::operator(opcode, operands)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_expr() -> Expr {
        Expr::operator(
            "and",
            vec![
                Expr::operator(
                    "eq",
                    vec![
                        Expr::Param(Param::new(Type::String, "group").unwrap()),
                        Expr::Value(Value::string("beta")),
                    ],
                )
                .unwrap(),
                Expr::operator(
                    "percentile",
                    vec![
                        Expr::Param(Param::new(Type::String, "user-id").unwrap()),
                        Expr::Value(Value::int64(25)),
                    ],
                )
                .unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let expr = sample_expr();
        let encoded = serde_json::to_string(&expr).unwrap();
        let decoded: Expr = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, expr);
    }

    #[test]
    fn value_nodes_carry_kind_type_data() {
        let encoded = serde_json::to_value(Expr::Value(Value::int64(-10))).unwrap();
        assert_eq!(
            encoded,
            json!({"kind": "value", "type": "int64", "data": "-10"})
        );
    }

    #[test]
    fn param_nodes_carry_kind_type_name() {
        let encoded =
            serde_json::to_value(Expr::Param(Param::new(Type::Bool, "vip").unwrap())).unwrap();
        assert_eq!(encoded, json!({"kind": "param", "type": "bool", "name": "vip"}));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let node = json!({"kind": "frobnicate", "operands": []});
        let err = expr_from_json(&node).unwrap_err();
        assert!(matches!(err, Error::UnknownOperator { .. }));
    }

    #[test]
    fn decode_enforces_contracts() {
        // `not` applied to an int64 violates its contract even though the
        // JSON shape is fine.
        let node = json!({
            "kind": "not",
            "operands": [{"kind": "value", "type": "int64", "data": "1"}],
        });
        let err = expr_from_json(&node).unwrap_err();
        assert!(matches!(err, Error::ContractViolation { .. }));
    }

    #[test]
    fn decode_validates_literals() {
        let node = json!({"kind": "value", "type": "bool", "data": "yes"});
        let err = expr_from_json(&node).unwrap_err();
        assert!(matches!(err, Error::BadLiteral { .. }));
    }

    #[test]
    fn bare_value_round_trip() {
        let v = Value::float64(-3.14);
        let encoded = serde_json::to_string(&v).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, v);
    }
}
