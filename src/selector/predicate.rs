//! Predicate mini-language for JSON documents.
//!
//! A predicate is a conjunction of comparison terms:
//!
//! ```text
//! applicationVersion == "1.24.36"
//! retries != 0
//! tags contains "application log"
//! meta.build.channel == "stable" and tags contains "archived"
//! ```
//!
//! Each term compares a dotted field path against a literal. `contains`
//! tests array membership when the field is an array and substring presence
//! when it is a string. Numeric path segments index into arrays. Missing
//! fields fail their term. The grammar is deliberately closed: it selects
//! documents, it does not transform them.

use super::error::SelectorError;
use serde_json::Value;

/// A parsed predicate, evaluated against a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Both sides must hold.
    And(Box<Predicate>, Box<Predicate>),
    /// A field compared against a literal.
    Cmp {
        path: Vec<String>,
        op: CmpOp,
        literal: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Contains,
}

impl Predicate {
    /// Parse an expression once, at configuration time.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(SelectorError::EmptyPredicate);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.expression()?;
        if let Some((offset, token)) = parser.peek_raw() {
            return Err(SelectorError::InvalidPredicate {
                offset,
                message: format!("unexpected trailing {}", token.describe()),
            });
        }
        Ok(predicate)
    }

    /// Evaluate against a parsed document. Pure; no side effects.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Predicate::And(left, right) => left.matches(doc) && right.matches(doc),
            Predicate::Cmp { path, op, literal } => {
                let Some(value) = lookup(doc, path) else {
                    return false;
                };
                match op {
                    CmpOp::Eq => json_eq(value, literal),
                    CmpOp::Ne => !json_eq(value, literal),
                    CmpOp::Contains => contains(value, literal),
                }
            }
        }
    }
}

/// Walk a dotted path through objects and arrays.
fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Equality with numeric coercion, so `1` and `1.0` compare equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn contains(value: &Value, literal: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| json_eq(item, literal)),
        Value::String(haystack) => literal
            .as_str()
            .is_some_and(|needle| haystack.contains(needle)),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Number(f64),
    Dot,
    EqEq,
    NotEq,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{w}'"),
            Token::Str(_) => "string literal".to_string(),
            Token::Number(n) => format!("number {n}"),
            Token::Dot => "'.'".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '-')
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push((offset, Token::Dot));
            }
            '=' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push((offset, Token::EqEq)),
                    _ => {
                        return Err(SelectorError::InvalidPredicate {
                            offset,
                            message: "expected '==' (single '=' is not an operator)".to_string(),
                        });
                    }
                }
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push((offset, Token::NotEq)),
                    _ => {
                        return Err(SelectorError::InvalidPredicate {
                            offset,
                            message: "expected '!='".to_string(),
                        });
                    }
                }
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(SelectorError::InvalidPredicate {
                        offset,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push((offset, Token::Str(value)));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E') {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = text
                    .parse::<f64>()
                    .map_err(|_| SelectorError::InvalidPredicate {
                        offset,
                        message: format!("invalid number '{text}'"),
                    })?;
                tokens.push((offset, Token::Number(number)));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if is_word_char(c) {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((offset, Token::Word(word)));
            }
            other => {
                return Err(SelectorError::InvalidPredicate {
                    offset,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek_raw(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(o, t)| (*o, t))
    }

    fn next_raw(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map(|(o, _)| *o + 1).unwrap_or(0)
    }

    /// expression := term ('and' term)*
    fn expression(&mut self) -> Result<Predicate, SelectorError> {
        let mut left = self.term()?;
        while matches!(self.peek_raw(), Some((_, Token::Word(w))) if w == "and") {
            self.next_raw();
            let right = self.term()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// term := path op literal
    fn term(&mut self) -> Result<Predicate, SelectorError> {
        let path = self.path()?;
        let op = self.operator()?;
        let literal = self.literal()?;
        Ok(Predicate::Cmp { path, op, literal })
    }

    /// path := segment ('.' segment)*, where a segment is a word or an
    /// array index.
    fn path(&mut self) -> Result<Vec<String>, SelectorError> {
        let mut segments = vec![self.path_segment()?];
        while matches!(self.peek_raw(), Some((_, Token::Dot))) {
            self.next_raw();
            segments.push(self.path_segment()?);
        }
        Ok(segments)
    }

    fn path_segment(&mut self) -> Result<String, SelectorError> {
        match self.next_raw() {
            Some((_, Token::Word(w))) if w != "and" && w != "contains" => Ok(w),
            Some((_, Token::Number(n))) if n.fract() == 0.0 && n >= 0.0 => {
                Ok(format!("{}", n as u64))
            }
            Some((offset, token)) => Err(SelectorError::InvalidPredicate {
                offset,
                message: format!("expected field name, found {}", token.describe()),
            }),
            None => Err(SelectorError::InvalidPredicate {
                offset: self.end_offset(),
                message: "expected field name".to_string(),
            }),
        }
    }

    fn operator(&mut self) -> Result<CmpOp, SelectorError> {
        match self.next_raw() {
            Some((_, Token::EqEq)) => Ok(CmpOp::Eq),
            Some((_, Token::NotEq)) => Ok(CmpOp::Ne),
            Some((_, Token::Word(w))) if w == "contains" => Ok(CmpOp::Contains),
            Some((offset, token)) => Err(SelectorError::InvalidPredicate {
                offset,
                message: format!(
                    "expected '==', '!=' or 'contains', found {}",
                    token.describe()
                ),
            }),
            None => Err(SelectorError::InvalidPredicate {
                offset: self.end_offset(),
                message: "expected an operator".to_string(),
            }),
        }
    }

    fn literal(&mut self) -> Result<Value, SelectorError> {
        match self.next_raw() {
            Some((_, Token::Str(s))) => Ok(Value::String(s)),
            Some((offset, Token::Number(n))) => {
                serde_json::Number::from_f64(n).map(Value::Number).ok_or(
                    SelectorError::InvalidPredicate {
                        offset,
                        message: format!("number {n} cannot be represented"),
                    },
                )
            }
            Some((_, Token::Word(w))) if w == "true" => Ok(Value::Bool(true)),
            Some((_, Token::Word(w))) if w == "false" => Ok(Value::Bool(false)),
            Some((offset, token)) => Err(SelectorError::InvalidPredicate {
                offset,
                message: format!(
                    "expected a string, number or boolean literal, found {}",
                    token.describe()
                ),
            }),
            None => Err(SelectorError::InvalidPredicate {
                offset: self.end_offset(),
                message: "expected a literal".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_equality() {
        let p = Predicate::parse(r#"applicationVersion == "1.24.36""#).unwrap();
        assert!(p.matches(&json!({"applicationVersion": "1.24.36"})));
        assert!(!p.matches(&json!({"applicationVersion": "9.9.9"})));
    }

    #[test]
    fn parses_conjunction_with_array_contains() {
        let doc = json!({
            "tags": ["application log"],
            "applicationVersion": "1.24.36"
        });
        let p = Predicate::parse(
            r#"applicationVersion == "1.24.36" and tags contains "application log""#,
        )
        .unwrap();
        assert!(p.matches(&doc));

        let p = Predicate::parse(r#"applicationVersion == "9.9.9""#).unwrap();
        assert!(!p.matches(&doc));
    }

    #[test]
    fn contains_is_substring_on_strings() {
        let p = Predicate::parse(r#"message contains "timeout""#).unwrap();
        assert!(p.matches(&json!({"message": "request timeout after 30s"})));
        assert!(!p.matches(&json!({"message": "request failed"})));
    }

    #[test]
    fn numbers_compare_across_integer_and_float() {
        let p = Predicate::parse("retries == 3").unwrap();
        assert!(p.matches(&json!({"retries": 3})));
        assert!(p.matches(&json!({"retries": 3.0})));
        assert!(!p.matches(&json!({"retries": 4})));
    }

    #[test]
    fn inequality_fails_on_missing_field() {
        let p = Predicate::parse(r#"channel != "beta""#).unwrap();
        assert!(p.matches(&json!({"channel": "stable"})));
        assert!(!p.matches(&json!({"other": 1})));
    }

    #[test]
    fn dotted_path_descends_objects_and_arrays() {
        let doc = json!({"meta": {"builds": [{"id": "b-1"}, {"id": "b-2"}]}});
        let p = Predicate::parse(r#"meta.builds.1.id == "b-2""#).unwrap();
        assert!(p.matches(&doc));
    }

    #[test]
    fn boolean_literals() {
        let p = Predicate::parse("archived == true").unwrap();
        assert!(p.matches(&json!({"archived": true})));
        assert!(!p.matches(&json!({"archived": false})));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(Predicate::parse("").is_err());
        assert!(Predicate::parse("version = \"1\"").is_err());
        assert!(Predicate::parse("version ==").is_err());
        assert!(Predicate::parse(r#"version == "1" garbage"#).is_err());
        assert!(Predicate::parse(r#"version == "unterminated"#).is_err());
        assert!(Predicate::parse("== \"1\"").is_err());
    }

    #[test]
    fn error_reports_offset() {
        let err = Predicate::parse(r#"version ? "1""#).unwrap_err();
        match err {
            SelectorError::InvalidPredicate { offset, .. } => assert_eq!(offset, 8),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
