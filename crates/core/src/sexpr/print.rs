//! Printer for the canonical s-expression form.
//!
//! `parse(print(expr))` reconstructs a structurally equal tree, given a
//! scope that declares the expression's free parameters.

use super::parser::symbol_for;
use crate::expr::Expr;
use crate::types::Type;
use crate::value::Value;

/// Render an expression in its canonical surface form.
pub fn print(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Value(v) => write_value(out, v),
        Expr::Param(p) => out.push_str(&p.name),
        Expr::Operator(op) => {
            out.push('(');
            out.push_str(symbol_for(op.opcode()));
            if op.opcode() == "let" {
                // (let name type value body)
                if let [Expr::Param(binding), value, body] = op.operands() {
                    out.push(' ');
                    out.push_str(&binding.name);
                    out.push(' ');
                    out.push_str(binding.ty.name());
                    out.push(' ');
                    write_expr(out, value);
                    out.push(' ');
                    write_expr(out, body);
                    out.push(')');
                    return;
                }
            }
            for operand in op.operands() {
                out.push(' ');
                write_expr(out, operand);
            }
            out.push(')');
        }
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value.ty {
        Type::Bool => out.push_str(if value.data == "true" { "#true" } else { "#false" }),
        Type::Int64 | Type::Float64 => out.push_str(&value.data),
        _ => {
            out.push('"');
            for c in value.data.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_expr;
    use super::*;
    use crate::value::Param;
    use crate::Parameters;

    #[test]
    fn prints_surface_names() {
        let expr = Expr::operator(
            "eq",
            vec![
                Expr::Value(Value::int64(1)),
                Expr::Param(Param::new(Type::Int64, "foo").unwrap()),
            ],
        )
        .unwrap();
        assert_eq!(print(&expr), "(= 1 foo)");
    }

    #[test]
    fn prints_booleans_and_strings() {
        let expr = Expr::operator(
            "or",
            vec![
                Expr::Value(Value::bool(true)),
                Expr::operator(
                    "eq",
                    vec![
                        Expr::Value(Value::string("a \"quoted\" one")),
                        Expr::Value(Value::string("plain")),
                    ],
                )
                .unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(
            print(&expr),
            "(or #true (= \"a \\\"quoted\\\" one\" \"plain\"))"
        );
    }

    #[test]
    fn round_trips_through_the_parser() {
        let scope: Parameters = [
            ("foo".to_string(), Type::String),
            ("age".to_string(), Type::Int64),
        ]
        .into_iter()
        .collect();

        for src in [
            "#true",
            "(= foo \"bar\")",
            "(and (>= age 18) (< age 65))",
            "(or (in foo \"a\" \"b\" \"c\") (not #false))",
            "(percentile foo 25)",
            "(let x int64 3 (= x age))",
            "(<= -1.500000 2.000000)",
        ] {
            let parsed = parse_expr(src, &scope).unwrap();
            let printed = print(&parsed);
            let reparsed = parse_expr(&printed, &scope).unwrap();
            assert_eq!(reparsed, parsed, "round-trip of {src}");
            // The canonical form is a fixed point.
            assert_eq!(print(&reparsed), printed);
        }
    }
}
