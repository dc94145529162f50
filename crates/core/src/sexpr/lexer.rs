//! Single-pass scanner for the s-expression surface.

use super::{ParseError, Pos};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    /// `#true` / `#false`
    Bool(bool),
    Int(i64),
    /// Decimal literal, kept as written until typed.
    Float(String),
    /// Quoted string with escapes resolved.
    Str(String),
    /// Operator or parameter name.
    Symbol(String),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub pos: Pos,
}

struct Scanner {
    chars: Vec<(usize, char)>,
    src_len: usize,
    idx: usize,
    line: u32,
    column: u32,
}

impl Scanner {
    fn new(src: &str) -> Scanner {
        Scanner {
            chars: src.char_indices().collect(),
            src_len: src.len(),
            idx: 0,
            line: 1,
            column: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).map(|&(_, c)| c)
    }

    fn pos(&self) -> Pos {
        let abs = self
            .chars
            .get(self.idx)
            .map(|&(b, _)| b)
            .unwrap_or(self.src_len) as u32;
        Pos {
            line: self.line,
            column: self.column,
            abs,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let &(_, c) = self.chars.get(self.idx)?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError::at(pos, message)
    }
}

fn is_symbol_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '#')
}

/// Tokenize a source string. Every token carries the position of its first
/// character; the trailing `Eof` token carries the position one past the
/// input, which is where "unexpected end of file" diagnostics point.
pub fn lex(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut s = Scanner::new(src);
    let mut tokens = Vec::new();

    while let Some(c) = s.peek() {
        let pos = s.pos();

        if c.is_whitespace() {
            s.bump();
            continue;
        }

        match c {
            '(' => {
                s.bump();
                tokens.push(Spanned {
                    token: Token::LParen,
                    pos,
                });
            }
            ')' => {
                s.bump();
                tokens.push(Spanned {
                    token: Token::RParen,
                    pos,
                });
            }
            '"' => {
                s.bump();
                let mut text = String::new();
                loop {
                    match s.bump() {
                        None => return Err(s.error(pos, "unterminated string")),
                        Some('"') => break,
                        Some('\\') => match s.bump() {
                            None => return Err(s.error(pos, "unterminated string")),
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                        },
                        Some(other) => text.push(other),
                    }
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    pos,
                });
            }
            '#' => {
                s.bump();
                let mut word = String::new();
                while let Some(c) = s.peek() {
                    if !c.is_alphabetic() {
                        break;
                    }
                    word.push(c);
                    s.bump();
                }
                let token = match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    other => return Err(s.error(pos, format!("unknown literal \"#{other}\""))),
                };
                tokens.push(Spanned { token, pos });
            }
            _ if c.is_ascii_digit() || (c == '-' && peek_next_is_digit(&s)) => {
                let mut text = String::new();
                if c == '-' {
                    text.push(c);
                    s.bump();
                }
                while let Some(c) = s.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    text.push(c);
                    s.bump();
                }
                // Lookahead for a fractional part decides float vs int.
                if s.peek() == Some('.') && peek_next_is_digit(&s) {
                    text.push('.');
                    s.bump();
                    while let Some(c) = s.peek() {
                        if !c.is_ascii_digit() {
                            break;
                        }
                        text.push(c);
                        s.bump();
                    }
                    tokens.push(Spanned {
                        token: Token::Float(text),
                        pos,
                    });
                } else {
                    let n: i64 = text
                        .parse()
                        .map_err(|_| s.error(pos, format!("invalid integer \"{text}\"")))?;
                    tokens.push(Spanned {
                        token: Token::Int(n),
                        pos,
                    });
                }
            }
            _ if is_symbol_char(c) => {
                let mut word = String::new();
                while let Some(c) = s.peek() {
                    if !is_symbol_char(c) {
                        break;
                    }
                    word.push(c);
                    s.bump();
                }
                tokens.push(Spanned {
                    token: Token::Symbol(word),
                    pos,
                });
            }
            other => return Err(s.error(pos, format!("unexpected character {other:?}"))),
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: s.pos(),
    });
    Ok(tokens)
}

fn peek_next_is_digit(s: &Scanner) -> bool {
    s.chars
        .get(s.idx + 1)
        .map(|&(_, c)| c.is_ascii_digit())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_the_basics() {
        assert_eq!(
            kinds("(= 1 foo)"),
            vec![
                Token::LParen,
                Token::Symbol("=".to_string()),
                Token::Int(1),
                Token::Symbol("foo".to_string()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_booleans_strings_and_floats() {
        assert_eq!(
            kinds("(in #true \"a b\" -1.5)"),
            vec![
                Token::LParen,
                Token::Symbol("in".to_string()),
                Token::Bool(true),
                Token::Str("a b".to_string()),
                Token::Float("-1.5".to_string()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_resolve() {
        assert_eq!(
            kinds(r#""say \"hi\"\n""#),
            vec![Token::Str("say \"hi\"\n".to_string()), Token::Eof]
        );
    }

    #[test]
    fn negative_int_vs_symbol() {
        assert_eq!(kinds("-10"), vec![Token::Int(-10), Token::Eof]);
        assert_eq!(
            kinds("-"),
            vec![Token::Symbol("-".to_string()), Token::Eof]
        );
    }

    #[test]
    fn positions_count_lines_columns_and_bytes() {
        let tokens = lex("(=\n 1)").unwrap();
        // '(' at 1:0, '=' at 1:1, '1' at 2:1 abs 4, ')' at 2:2 abs 5.
        assert_eq!((tokens[0].pos.line, tokens[0].pos.column), (1, 0));
        assert_eq!((tokens[1].pos.line, tokens[1].pos.column), (1, 1));
        assert_eq!(
            (tokens[2].pos.line, tokens[2].pos.column, tokens[2].pos.abs),
            (2, 1, 4)
        );
        assert_eq!(
            (tokens[3].pos.line, tokens[3].pos.column, tokens[3].pos.abs),
            (2, 2, 5)
        );
    }

    #[test]
    fn eof_points_one_past_the_input() {
        let tokens = lex("(= 1 1").unwrap();
        let eof = tokens.last().unwrap();
        assert_eq!(eof.token, Token::Eof);
        assert_eq!((eof.pos.line, eof.pos.column, eof.pos.abs), (1, 6, 6));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = lex("\"oops").unwrap_err();
        assert_eq!(err.message, "unterminated string");
    }

    #[test]
    fn unknown_hash_literal_is_an_error() {
        let err = lex("#maybe").unwrap_err();
        assert!(err.message.contains("#maybe"));
    }
}
