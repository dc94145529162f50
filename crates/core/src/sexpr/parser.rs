//! Recursive-descent parser for the s-expression surface.
//!
//! The parser resolves operator names through the registry, resolves
//! identifiers against an explicit stack of lexical scopes (the signature's
//! parameters plus any open `let` bindings), and validates every operator
//! node against its contract as it is built. Every diagnostic carries the
//! position of the token it blames.

use super::lexer::{lex, Spanned, Token};
use super::{ParseError, Pos};
use crate::error::Error;
use crate::expr::Expr;
use crate::ruleset::{Rule, Signature};
use crate::types::Type;
use crate::value::{Param, Value};
use crate::Parameters;

/// Map a surface operator name to its opcode.
fn opcode_for(symbol: &str) -> Option<&'static str> {
    Some(match symbol {
        "=" => "eq",
        ">" => "gt",
        ">=" => "gte",
        "<" => "lt",
        "<=" => "lte",
        "not" => "not",
        "and" => "and",
        "or" => "or",
        "in" => "in",
        "fnv" => "fnv",
        "percentile" => "percentile",
        "let" => "let",
        _ => return None,
    })
}

/// The surface name of an opcode, for printing.
pub(crate) fn symbol_for(opcode: &str) -> &str {
    match opcode {
        "eq" => "=",
        "gt" => ">",
        "gte" => ">=",
        "lt" => "<",
        "lte" => "<=",
        other => other,
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    /// Lexical scopes, innermost last. Frame 0 is the signature.
    scopes: Vec<Parameters>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], params: &Parameters) -> Parser<'a> {
        Parser {
            tokens,
            pos: 0,
            scopes: vec![params.clone()],
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn cur_pos(&self) -> Pos {
        self.cur().pos
    }

    fn advance(&mut self) -> Spanned {
        let t = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::at(self.cur_pos(), message)
    }

    fn eof_err(&self) -> ParseError {
        ParseError::at(self.cur_pos(), "unexpected end of file")
    }

    fn resolve(&self, name: &str) -> Option<Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Token::RParen => {
                self.advance();
                Ok(())
            }
            Token::Eof => Err(self.eof_err()),
            other => Err(self.err(format!("expected ')', got {}", describe(other)))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::LParen => self.parse_list(),
            Token::Bool(b) => {
                self.advance();
                Ok(Expr::Value(Value::bool(b)))
            }
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Value(Value::int64(n)))
            }
            Token::Float(text) => {
                let pos = self.cur_pos();
                self.advance();
                let f: f64 = text
                    .parse()
                    .map_err(|_| ParseError::at(pos, format!("invalid number \"{text}\"")))?;
                Ok(Expr::Value(Value::float64(f)))
            }
            Token::Str(text) => {
                self.advance();
                Ok(Expr::Value(Value::string(text)))
            }
            Token::Symbol(name) => {
                let pos = self.cur_pos();
                self.advance();
                let ty = self.resolve(&name).ok_or_else(|| {
                    ParseError::at(pos, format!("unknown parameter \"{name}\""))
                })?;
                Param::new(ty, name)
                    .map(Expr::Param)
                    .map_err(|e| ParseError::at(pos, e.to_string()))
            }
            Token::RParen => Err(self.err("unexpected ')'")),
            Token::Eof => Err(self.eof_err()),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // consume '('

        let op_pos = self.cur_pos();
        let symbol = match self.peek().clone() {
            Token::Symbol(s) => {
                self.advance();
                s
            }
            Token::Eof => return Err(self.eof_err()),
            other => return Err(self.err(format!("expected operator, got {}", describe(&other)))),
        };

        let opcode = opcode_for(&symbol)
            .ok_or_else(|| ParseError::at(op_pos, format!("unknown operator \"{symbol}\"")))?;

        if opcode == "let" {
            return self.parse_let(op_pos);
        }

        let mut operands = Vec::new();
        loop {
            match self.peek() {
                Token::RParen => {
                    self.advance();
                    break;
                }
                Token::Eof => return Err(self.eof_err()),
                _ => operands.push(self.parse_expr()?),
            }
        }

        Expr::operator(opcode, operands).map_err(|e| ParseError::at(op_pos, e.to_string()))
    }

    /// `(let name type value body)` — the only accepted binding form. The
    /// legacy parenthesised declaration is rejected explicitly rather than
    /// misparsed.
    fn parse_let(&mut self, op_pos: Pos) -> Result<Expr, ParseError> {
        let name_pos = self.cur_pos();
        let name = match self.peek().clone() {
            Token::Symbol(s) => {
                self.advance();
                s
            }
            Token::Eof => return Err(self.eof_err()),
            other => {
                return Err(ParseError::at(
                    name_pos,
                    format!("expected binding name, got {}", describe(&other)),
                ))
            }
        };
        if self.resolve(&name).is_some() {
            return Err(ParseError::at(
                name_pos,
                format!("parameter \"{name}\" already defined"),
            ));
        }

        let ty_pos = self.cur_pos();
        let ty = match self.peek().clone() {
            Token::Symbol(s) => {
                self.advance();
                Type::concrete_from_name(&s)
                    .ok_or_else(|| ParseError::at(ty_pos, format!("unknown type \"{s}\"")))?
            }
            Token::Eof => return Err(self.eof_err()),
            other => {
                return Err(ParseError::at(
                    ty_pos,
                    format!("expected binding type, got {}", describe(&other)),
                ))
            }
        };

        let value_pos = self.cur_pos();
        let value = self.parse_expr()?;
        if value.return_type() != ty {
            return Err(ParseError::at(
                value_pos,
                format!(
                    "binding \"{name}\" is declared {ty}, its value is {}",
                    value.return_type()
                ),
            ));
        }

        self.scopes.push(Parameters::from([(name.clone(), ty)]));
        let body = self.parse_expr();
        self.scopes.pop();
        let body = body?;

        self.expect_rparen()?;

        let binding = Param::new(ty, name).map_err(|e| ParseError::at(name_pos, e.to_string()))?;
        Expr::operator("let", vec![Expr::Param(binding), value, body])
            .map_err(|e| ParseError::at(op_pos, e.to_string()))
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Bool(b) => format!("#{b}"),
        Token::Int(n) => format!("\"{n}\""),
        Token::Float(f) => format!("\"{f}\""),
        Token::Str(s) => format!("{s:?}"),
        Token::Symbol(s) => format!("\"{s}\""),
        Token::Eof => "end of file".to_string(),
    }
}

/// Parse a single expression against the given parameter scope.
pub fn parse_expr(src: &str, params: &Parameters) -> Result<Expr, ParseError> {
    let tokens = lex(src)?;
    let mut parser = Parser::new(&tokens, params);
    let expr = parser.parse_expr()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.err(format!("unexpected {} after expression", describe(other)))),
    }
}

/// One rule of an authoring payload: a predicate in s-expression form plus
/// the lexical return value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRule {
    pub s_expr: String,
    pub return_value: String,
}

/// A diagnostic tied to the rule that produced it. Rules are numbered from
/// one, and the same number is used in error paths (`["rules","1","sExpr"]`).
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDiagnostic {
    pub rule: usize,
    pub error: ParseError,
}

/// Parse an ordered rule batch against a signature.
///
/// Never stops at the first failure: every rule is parsed and every
/// diagnostic is reported, so an authoring client can mark all broken
/// rules in one round trip.
pub fn parse_rules(
    rules: &[SourceRule],
    signature: &Signature,
) -> Result<Vec<Rule>, Vec<RuleDiagnostic>> {
    let mut parsed = Vec::new();
    let mut diagnostics = Vec::new();

    for (i, source) in rules.iter().enumerate() {
        match parse_rule(source, signature) {
            Ok(rule) => parsed.push(rule),
            Err(error) => diagnostics.push(RuleDiagnostic {
                rule: i + 1,
                error,
            }),
        }
    }

    if diagnostics.is_empty() {
        Ok(parsed)
    } else {
        Err(diagnostics)
    }
}

fn parse_rule(source: &SourceRule, signature: &Signature) -> Result<Rule, ParseError> {
    let expr = parse_expr(&source.s_expr, &signature.params)?;
    if expr.return_type() != Type::Bool {
        return Err(ParseError::at(
            Pos {
                line: 1,
                column: 0,
                abs: 0,
            },
            format!("rule predicate must return bool, got {}", expr.return_type()),
        ));
    }

    // The return value is written in the lexical form of the signature's
    // return type, not as an s-expression.
    let result = Value::new(signature.return_type, source.return_value.clone()).map_err(
        |e: Error| {
            ParseError::at(
                Pos {
                    line: 1,
                    column: 0,
                    abs: 0,
                },
                e.to_string(),
            )
        },
    )?;

    Ok(Rule::new(expr, Expr::Value(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::eval;
    use crate::params::ParamBag;
    use crate::types::Type;
    use std::collections::BTreeMap;

    fn params(entries: &[(&str, Type)]) -> Parameters {
        entries
            .iter()
            .map(|(n, t)| (n.to_string(), *t))
            .collect()
    }

    #[test]
    fn parses_atoms() {
        let scope = params(&[("foo", Type::String)]);
        assert_eq!(
            parse_expr("#true", &scope).unwrap(),
            Expr::Value(Value::bool(true))
        );
        assert_eq!(
            parse_expr("-10", &scope).unwrap(),
            Expr::Value(Value::int64(-10))
        );
        assert_eq!(
            parse_expr("1.5", &scope).unwrap(),
            Expr::Value(Value::float64(1.5))
        );
        assert_eq!(
            parse_expr("\"hi\"", &scope).unwrap(),
            Expr::Value(Value::string("hi"))
        );
        assert_eq!(
            parse_expr("foo", &scope).unwrap(),
            Expr::Param(Param::new(Type::String, "foo").unwrap())
        );
    }

    #[test]
    fn parses_operator_forms() {
        let scope = params(&[("foo", Type::String)]);
        let expr = parse_expr("(= foo \"bar\")", &scope).unwrap();
        assert_eq!(
            expr,
            Expr::operator(
                "eq",
                vec![
                    Expr::Param(Param::new(Type::String, "foo").unwrap()),
                    Expr::Value(Value::string("bar")),
                ],
            )
            .unwrap()
        );

        // Nested, variadic, surface names.
        let expr = parse_expr("(or (>= 2 1) (not #true) #false)", &scope).unwrap();
        assert_eq!(expr.return_type(), Type::Bool);
    }

    #[test]
    fn mixed_types_parse_for_any_terms() {
        // gt's terms are ANY; the mismatch only surfaces at eval.
        let scope = params(&[("age", Type::Int64)]);
        let expr = parse_expr("(> age \"10\")", &scope).unwrap();
        let err = eval(&expr, &ParamBag::new().with("age", 5i64)).unwrap_err();
        assert!(matches!(err, crate::EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn unexpected_eof_diagnostic_matches_the_cut() {
        let err = parse_expr("(= 1 1", &Parameters::new()).unwrap_err();
        assert_eq!(err.message, "unexpected end of file");
        assert_eq!((err.line, err.column, err.abs_char), (1, 6, 6));
    }

    #[test]
    fn unknown_operator_diagnostic_points_at_the_opcode() {
        let err = parse_expr("(frob 1)", &Parameters::new()).unwrap_err();
        assert_eq!(err.message, "unknown operator \"frob\"");
        assert_eq!(err.column, 1);
    }

    #[test]
    fn unknown_parameter_diagnostic_points_at_the_name() {
        let err = parse_expr("(= 1 bar)", &Parameters::new()).unwrap_err();
        assert_eq!(err.message, "unknown parameter \"bar\"");
        assert_eq!(err.column, 5);
        assert_eq!(err.abs_char, 5);
    }

    #[test]
    fn contract_violations_become_type_diagnostics_at_the_opcode() {
        let err = parse_expr("(not 1)", &Parameters::new()).unwrap_err();
        assert!(err.message.contains("term 0"));
        assert_eq!(err.column, 1);
    }

    #[test]
    fn let_binds_a_scope() {
        let expr = parse_expr("(let x int64 3 (= x 3))", &Parameters::new()).unwrap();
        assert_eq!(eval(&expr, &ParamBag::new()).unwrap(), Value::bool(true));
    }

    #[test]
    fn let_scope_closes_with_the_body() {
        let err = parse_expr("(and (let x int64 3 (= x 3)) (= x 3))", &Parameters::new())
            .unwrap_err();
        assert_eq!(err.message, "unknown parameter \"x\"");
    }

    #[test]
    fn let_rejects_shadowing() {
        let scope = params(&[("x", Type::Int64)]);
        let err = parse_expr("(let x int64 3 (= x 3))", &scope).unwrap_err();
        assert_eq!(err.message, "parameter \"x\" already defined");
    }

    #[test]
    fn let_rejects_the_legacy_binding_form() {
        let err = parse_expr("(let ((x int64)) 3 (= x 3))", &Parameters::new()).unwrap_err();
        assert!(err.message.starts_with("expected binding name"));
    }

    #[test]
    fn let_checks_the_declared_value_type() {
        let err = parse_expr("(let x int64 \"three\" (= x 3))", &Parameters::new()).unwrap_err();
        assert!(err.message.contains("declared int64"));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse_expr("(= 1 1) junk", &Parameters::new()).unwrap_err();
        assert!(err.message.contains("after expression"));
    }

    #[test]
    fn parse_rules_accumulates_diagnostics() {
        let signature = Signature::new(BTreeMap::new(), Type::String);
        let rules = vec![
            SourceRule {
                s_expr: "(= 1 1".to_string(),
                return_value: "a".to_string(),
            },
            SourceRule {
                s_expr: "(= 1 missing)".to_string(),
                return_value: "b".to_string(),
            },
            SourceRule {
                s_expr: "(= 1 1)".to_string(),
                return_value: "c".to_string(),
            },
        ];
        let diagnostics = parse_rules(&rules, &signature).unwrap_err();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].rule, 1);
        assert_eq!(diagnostics[0].error.message, "unexpected end of file");
        assert_eq!(diagnostics[1].rule, 2);
    }

    #[test]
    fn parse_rules_types_the_return_value_against_the_signature() {
        let signature = Signature::new(BTreeMap::new(), Type::Int64);
        let ok = vec![SourceRule {
            s_expr: "#true".to_string(),
            return_value: "42".to_string(),
        }];
        let rules = parse_rules(&ok, &signature).unwrap();
        assert_eq!(rules[0].result, Expr::Value(Value::int64(42)));

        let bad = vec![SourceRule {
            s_expr: "#true".to_string(),
            return_value: "wibble".to_string(),
        }];
        let diagnostics = parse_rules(&bad, &signature).unwrap_err();
        assert!(diagnostics[0].error.message.contains("int64"));
    }

    #[test]
    fn parse_rules_rejects_non_bool_predicates() {
        let signature = Signature::new(BTreeMap::new(), Type::String);
        let rules = vec![SourceRule {
            s_expr: "(fnv \"x\")".to_string(),
            return_value: "a".to_string(),
        }];
        let diagnostics = parse_rules(&rules, &signature).unwrap_err();
        assert!(diagnostics[0]
            .error
            .message
            .contains("predicate must return bool"));
    }
}
