//! Attribute predicates of the memory engine
//!
//! A small subset of OGR SQL `WHERE` clauses: comparisons (`=`, `<>`, `!=`, `<`, `<=`,
//! `>`, `>=`), `[NOT] LIKE`, `[NOT] IN (...)`, `IS [NOT] NULL`, `AND`, `OR`, `NOT` and
//! parentheses. Identifiers are field names, optionally double quoted, or `FID`.
//! Evaluation follows SQL three-valued logic: a feature matches only when the predicate
//! is known to be true.

use std::cmp::Ordering;

use crate::engine::{NativeField, OgrDateTime};
use crate::errors::{GdalError, OgrErr, Result};
use crate::vector::FieldDefn;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    Field(usize),
    Fid,
    Literal(Scalar),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Scalar {
    Null,
    Num(f64),
    Str(String),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Compare(Operand, &'static str, Operand),
    Like {
        operand: Operand,
        pattern: String,
        negated: bool,
    },
    In {
        operand: Operand,
        values: Vec<Scalar>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn syntax_error(msg: String) -> GdalError {
    GdalError::OgrError {
        err: OgrErr::CorruptData,
        method_name: "OGR_L_SetAttributeFilter",
        msg,
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                        None => return Err(syntax_error("unterminated string literal".into())),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| *ch == '"')
                    .ok_or_else(|| syntax_error("unterminated quoted identifier".into()))?;
                tokens.push(Token::Ident(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            '=' => {
                tokens.push(Token::Op("="));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<>"));
                i += 2;
            }
            '<' | '>' => {
                let op = match (c, chars.get(i + 1)) {
                    ('<', Some('=')) => "<=",
                    ('<', Some('>')) => "<>",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            _ if c.is_ascii_digit()
                || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit))
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == '.')) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || ((chars[i] == 'e' || chars[i] == 'E')
                            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+'))
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| syntax_error(format!("invalid number '{literal}'")))?;
                tokens.push(Token::Num(value));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(syntax_error(format!("unexpected character '{c}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    fields: &'a [FieldDefn],
    fid_column: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(syntax_error(format!("expected {token:?}, found {other:?}"))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("OR") {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("AND") {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let operand = self.operand()?;
        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err(syntax_error("expected NULL after IS".into()));
            }
            return Ok(Expr::IsNull { operand, negated });
        }
        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Expr::Like {
                    operand,
                    pattern,
                    negated,
                }),
                other => Err(syntax_error(format!(
                    "expected a pattern after LIKE, found {other:?}"
                ))),
            };
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut values = Vec::new();
            loop {
                match self.operand()? {
                    Operand::Literal(value) => values.push(value),
                    _ => return Err(syntax_error("IN expects a list of literals".into())),
                }
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    other => {
                        return Err(syntax_error(format!(
                            "expected ',' or ')', found {other:?}"
                        )))
                    }
                }
            }
            return Ok(Expr::In {
                operand,
                values,
                negated,
            });
        }
        if negated {
            return Err(syntax_error("expected LIKE or IN after NOT".into()));
        }
        match self.next() {
            Some(Token::Op(op)) => {
                let rhs = self.operand()?;
                Ok(Expr::Compare(operand, op, rhs))
            }
            other => Err(syntax_error(format!(
                "expected a comparison operator, found {other:?}"
            ))),
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Operand::Literal(Scalar::Num(n))),
            Some(Token::Str(s)) => Ok(Operand::Literal(Scalar::Str(s))),
            Some(Token::Ident(name)) if name.eq_ignore_ascii_case("NULL") => {
                Ok(Operand::Literal(Scalar::Null))
            }
            Some(Token::Ident(name)) => self.resolve(&name),
            other => Err(syntax_error(format!("expected an operand, found {other:?}"))),
        }
    }

    fn resolve(&self, name: &str) -> Result<Operand> {
        if let Some(idx) = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
        {
            return Ok(Operand::Field(idx));
        }
        if name.eq_ignore_ascii_case("FID")
            || (!self.fid_column.is_empty() && name.eq_ignore_ascii_case(self.fid_column))
        {
            return Ok(Operand::Fid);
        }
        Err(syntax_error(format!("\"{name}\" not recognised as an available field")))
    }
}

/// Parses `text` against the fields of a layer.
pub(crate) fn parse(text: &str, fields: &[FieldDefn], fid_column: &str) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        fields,
        fid_column,
    };
    if parser.tokens.is_empty() {
        return Err(syntax_error("empty predicate".into()));
    }
    let expr = parser.or_expr()?;
    if let Some(token) = parser.peek() {
        return Err(syntax_error(format!("unexpected {token:?}")));
    }
    Ok(expr)
}

fn date_string(dt: &OgrDateTime, with_date: bool, with_time: bool) -> String {
    let date = format!("{:04}-{:02}-{:02}", dt.year, dt.month, dt.day);
    let time = format!("{:02}:{:02}:{:02}", dt.hour, dt.minute, dt.second as u32);
    match (with_date, with_time) {
        (true, true) => format!("{date}T{time}"),
        (true, false) => date,
        _ => time,
    }
}

fn scalar_of(field: &NativeField) -> Scalar {
    match field {
        NativeField::Integer(v) => Scalar::Num(f64::from(*v)),
        NativeField::Integer64(v) => Scalar::Num(*v as f64),
        NativeField::Real(v) => Scalar::Num(*v),
        NativeField::String(s) => Scalar::Str(s.clone()),
        NativeField::Date(dt) => Scalar::Str(date_string(dt, true, false)),
        NativeField::DateTime(dt) => Scalar::Str(date_string(dt, true, true)),
        NativeField::Time(dt) => Scalar::Str(date_string(dt, false, true)),
        _ => Scalar::Null,
    }
}

fn compare(lhs: &Scalar, rhs: &Scalar) -> Option<Ordering> {
    match (lhs, rhs) {
        (Scalar::Null, _) | (_, Scalar::Null) => None,
        (Scalar::Num(a), Scalar::Num(b)) => a.partial_cmp(b),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Num(a), Scalar::Str(b)) => b.trim().parse::<f64>().ok()?.partial_cmp(a).map(Ordering::reverse),
        (Scalar::Str(a), Scalar::Num(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(b),
    }
}

fn like(text: &str, pattern: &str) -> bool {
    fn matches(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('%', rest)) => (0..=text.len()).any(|skip| matches(&text[skip..], rest)),
            Some(('_', rest)) => !text.is_empty() && matches(&text[1..], rest),
            Some((c, rest)) => text
                .first()
                .is_some_and(|t| t.to_lowercase().eq(c.to_lowercase()))
                && matches(&text[1..], rest),
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches(&text, &pattern)
}

impl Expr {
    /// Evaluates the predicate for one record. `None` is SQL `UNKNOWN`.
    pub(crate) fn eval(&self, fid: i64, fields: &[NativeField]) -> Option<bool> {
        let value = |operand: &Operand| match operand {
            Operand::Field(idx) => fields.get(*idx).map(scalar_of).unwrap_or(Scalar::Null),
            Operand::Fid => Scalar::Num(fid as f64),
            Operand::Literal(s) => s.clone(),
        };
        match self {
            Expr::Compare(lhs, op, rhs) => {
                let ord = compare(&value(lhs), &value(rhs))?;
                Some(match *op {
                    "=" => ord == Ordering::Equal,
                    "<>" => ord != Ordering::Equal,
                    "<" => ord == Ordering::Less,
                    "<=" => ord != Ordering::Greater,
                    ">" => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })
            }
            Expr::Like {
                operand,
                pattern,
                negated,
            } => match value(operand) {
                Scalar::Null => None,
                Scalar::Str(s) => Some(like(&s, pattern) != *negated),
                Scalar::Num(n) => Some(like(&n.to_string(), pattern) != *negated),
            },
            Expr::In {
                operand,
                values,
                negated,
            } => {
                let v = value(operand);
                if v == Scalar::Null {
                    return None;
                }
                let mut unknown = false;
                for candidate in values {
                    match compare(&v, candidate) {
                        Some(Ordering::Equal) => return Some(!*negated),
                        None => unknown = true,
                        _ => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(*negated)
                }
            }
            Expr::IsNull { operand, negated } => Some((value(operand) == Scalar::Null) != *negated),
            Expr::Not(inner) => inner.eval(fid, fields).map(|b| !b),
            Expr::And(lhs, rhs) => match (lhs.eval(fid, fields), rhs.eval(fid, fields)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::Or(lhs, rhs) => match (lhs.eval(fid, fields), rhs.eval(fid, fields)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }

    pub(crate) fn matches(&self, fid: i64, fields: &[NativeField]) -> bool {
        self.eval(fid, fields) == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FieldType;

    fn fields() -> Vec<FieldDefn> {
        vec![
            FieldDefn::new("name", FieldType::String),
            FieldDefn::new("ig_year", FieldType::Integer),
            FieldDefn::new("area", FieldType::Real),
        ]
    }

    fn eval(text: &str, fid: i64, values: &[NativeField]) -> bool {
        parse(text, &fields(), "").unwrap().matches(fid, values)
    }

    #[test]
    fn test_comparisons() {
        let rec = [
            NativeField::String("Bear".into()),
            NativeField::Integer(2020),
            NativeField::Real(12.5),
        ];
        assert!(eval("ig_year = 2020", 1, &rec));
        assert!(eval("ig_year >= 2000 AND area < 13", 1, &rec));
        assert!(!eval("ig_year <> 2020", 1, &rec));
        assert!(eval("ig_year != 2019", 1, &rec));
        assert!(eval("name = 'Bear'", 1, &rec));
        assert!(eval("\"name\" LIKE 'be%'", 1, &rec));
        assert!(eval("name NOT LIKE '_x%'", 1, &rec));
        assert!(eval("ig_year IN (2019, 2020)", 1, &rec));
        assert!(eval("NOT (ig_year < 2000) OR name IS NULL", 1, &rec));
        assert!(eval("FID = 1", 1, &rec));
        assert!(eval("IG_YEAR > 1999.5", 1, &rec));
    }

    #[test]
    fn test_null_semantics() {
        let rec = [NativeField::Null, NativeField::Unset, NativeField::Real(1.0)];
        assert!(eval("name IS NULL", 1, &rec));
        assert!(!eval("ig_year = 2020", 1, &rec));
        assert!(!eval("NOT (ig_year = 2020)", 1, &rec));
        assert!(eval("ig_year = 2020 OR area = 1", 1, &rec));
        assert!(!eval("ig_year NOT IN (1, 2)", 1, &rec));
        assert!(eval("ig_year IS NULL AND name IS NULL", 1, &rec));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "ig_year = ",
            "missing_field = 1",
            "ig_year = 'unterminated",
            "ig_year === 1",
            "(ig_year = 1",
            "ig_year 1",
            "",
        ] {
            assert!(parse(bad, &fields(), "").is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn test_date_comparison() {
        let fields = vec![FieldDefn::new("d", FieldType::Date)];
        let date = NativeField::Date(OgrDateTime {
            year: 2020,
            month: 3,
            day: 1,
            ..Default::default()
        });
        let expr = parse("d >= '2020-01-01'", &fields, "").unwrap();
        assert!(expr.matches(1, &[date]));
    }
}
