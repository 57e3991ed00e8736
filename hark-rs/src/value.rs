//! Typed argument values.
//!
//! Words are cast to a value by lexical shape: `true`/`false` become booleans,
//! plain decimal numbers become numbers, everything else stays a string.
//! Quoted or escaped text is never cast.

use std::fmt;

use crate::block::Block;

/// Integers with more significant digits than this are kept as strings so
/// snowflake-style ids survive without losing precision.
const MAX_NUMERIC_DIGITS: usize = 15;

/// A positional argument or flag value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    /// Deferred-evaluation literal such as `$(1 + 2)`.
    Expr(Expr),
    /// Triple-backtick multi-line literal.
    Code(Code),
    /// Nested invocation such as `{!roll 6}`.
    Block(Box<Block>),
}

/// Body of an expression literal, without the `$` and outer brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub open: char,
    pub body: String,
}

impl Expr {
    pub fn close(&self) -> char {
        closing_bracket(self.open).unwrap_or(self.open)
    }
}

/// Multi-line literal with its language tag (possibly empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub lang: String,
    pub body: String,
}

/// Value category, used by typed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Num,
    Bool,
    Expr,
    Code,
    Block,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Str => "string",
            ValueKind::Num => "number",
            ValueKind::Bool => "bool",
            ValueKind::Expr => "expression",
            ValueKind::Code => "code block",
            ValueKind::Block => "block",
        })
    }
}

impl Value {
    /// Cast an unquoted word by its lexical shape.
    pub fn cast(word: &str) -> Value {
        match word {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }

        if is_numeric(word) {
            let digits = word.chars().filter(|c| c.is_ascii_digit()).count();
            if digits <= MAX_NUMERIC_DIGITS {
                if let Ok(n) = word.parse::<f64>() {
                    return Value::Num(n);
                }
            }
        }

        Value::Str(word.to_string())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::Num(_) => ValueKind::Num,
            Value::Bool(_) => ValueKind::Bool,
            Value::Expr(_) => ValueKind::Expr,
            Value::Code(_) => ValueKind::Code,
            Value::Block(_) => ValueKind::Block,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Value::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Plain text form, as used when arguments are joined into one string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::Expr(_) => self.to_string(),
            Value::Code(code) => code.body.clone(),
            Value::Block(block) => block.text.clone(),
        }
    }
}

/// Canonical source form: re-tokenizing it yields an equal value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) if needs_quotes(s) => f.write_str(&quote(s)),
            Value::Str(s) => f.write_str(s),
            Value::Num(n) => f.write_str(&format_number(*n)),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Expr(expr) => write!(f, "${}{}{}", expr.open, expr.body, expr.close()),
            Value::Code(code) => write!(f, "```{}\n{}```", code.lang, code.body),
            Value::Block(block) => write!(f, "{{{}}}", block.text),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Block> for Value {
    fn from(block: Block) -> Self {
        Value::Block(Box::new(block))
    }
}

pub(crate) fn closing_bracket(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

/// `-?digits(.digits)?`
pub(crate) fn is_numeric(word: &str) -> bool {
    let unsigned = word.strip_prefix('-').unwrap_or(word);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    all_digits(int) && frac.map_or(true, all_digits)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn needs_quotes(s: &str) -> bool {
    if s.is_empty() || !matches!(Value::cast(s), Value::Str(_)) {
        return true;
    }
    if s
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '{' | '}' | ';'))
    {
        return true;
    }
    let mut chars = s.chars();
    let second = s.chars().nth(1);
    match chars.next() {
        Some('-') => true,
        Some('/') => matches!(second, Some('/') | Some('*')),
        Some('$') => second.and_then(closing_bracket).is_some(),
        _ => s.starts_with("```"),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_by_shape() {
        assert_eq!(Value::cast("12"), Value::Num(12.0));
        assert_eq!(Value::cast("-3.5"), Value::Num(-3.5));
        assert_eq!(Value::cast("true"), Value::Bool(true));
        assert_eq!(Value::cast("1.2.3"), Value::Str("1.2.3".into()));
        assert_eq!(Value::cast("abc"), Value::Str("abc".into()));
        assert_eq!(Value::cast("-"), Value::Str("-".into()));
    }

    #[test]
    fn test_long_ids_stay_strings() {
        let id = "123456789012345678";
        assert_eq!(Value::cast(id), Value::Str(id.into()));
    }

    #[test]
    fn test_render_quotes_ambiguous_strings() {
        assert_eq!(Value::from("a b").to_string(), "\"a b\"");
        assert_eq!(Value::from("1").to_string(), "\"1\"");
        assert_eq!(Value::from("-x").to_string(), "\"-x\"");
        assert_eq!(Value::from("say \"hi\"").to_string(), "\"say \\\"hi\\\"\"");
        assert_eq!(Value::from("plain").to_string(), "plain");
    }

    #[test]
    fn test_number_text() {
        assert_eq!(Value::Num(1.0).to_text(), "1");
        assert_eq!(Value::Num(2.25).to_text(), "2.25");
    }

    #[test]
    fn test_expr_render() {
        let expr = Value::Expr(Expr {
            open: '(',
            body: "1 + (2)".into(),
        });
        assert_eq!(expr.to_string(), "$(1 + (2))");
    }
}
