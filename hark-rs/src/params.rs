//! Parameter and flag declarations.
//!
//! Declarations are plain strings so they can live in JSON manifests:
//!
//! | Declaration      | Meaning                                  |
//! |------------------|------------------------------------------|
//! | `<name>`         | required                                 |
//! | `[name]`         | optional                                 |
//! | `<name...>`      | variadic, at least one                   |
//! | `[name...]`      | variadic, possibly none                  |
//! | `<name:number>`  | typed (`string`, `number`, `bool`, `block`, `expr`, `any`) |
//! | `<add\|remove>`  | one of a fixed set of words              |
//!
//! Flags are declared as `-name|alias|alias` and are not validated.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::value::{Value, ValueKind};

const ELLIPSIS: &str = "...";
const TYPE_SEPARATOR: char = ':';
const CHOICE_SEPARATOR: char = '|';

/// Malformed parameter or flag declaration. Raised at registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("empty declaration")]
    Empty,

    #[error("malformed declaration '{0}': expected <name> or [name]")]
    Malformed(String),

    #[error("unknown parameter type '{0}'")]
    UnknownType(String),

    #[error("required parameter '{0}' follows an optional one")]
    RequiredAfterOptional(String),

    #[error("variadic parameter '{0}' must be last")]
    VariadicNotLast(String),
}

/// Argument list rejected by a [`Signature`]. Rendered as a denial reason.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgumentError {
    #[error("missing required argument <{0}>")]
    Missing(String),

    #[error("too many arguments: expected at most {expected}, got {got}")]
    TooMany { expected: usize, got: usize },

    #[error("argument <{name}> must be a {expected}, got a {found}")]
    WrongType {
        name: String,
        expected: ParamType,
        found: ValueKind,
    },

    #[error("argument <{name}> must be one of {}, got '{value}'", .choices.join(", "))]
    InvalidChoice {
        name: String,
        value: String,
        choices: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    /// Any scalar: string, number, bool or code literal
    String,
    Number,
    Bool,
    Block,
    Expr,
    #[default]
    Any,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::String => !matches!(value, Value::Block(_) | Value::Expr(_)),
            ParamType::Number => value.kind() == ValueKind::Num,
            ParamType::Bool => value.kind() == ValueKind::Bool,
            ParamType::Block => value.kind() == ValueKind::Block,
            ParamType::Expr => value.kind() == ValueKind::Expr,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Bool => "bool",
            ParamType::Block => "block",
            ParamType::Expr => "expr",
            ParamType::Any => "any",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamType {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(ParamType::String),
            "number" | "num" => Ok(ParamType::Number),
            "bool" | "boolean" => Ok(ParamType::Bool),
            "block" => Ok(ParamType::Block),
            "expr" | "expression" => Ok(ParamType::Expr),
            "any" | "" => Ok(ParamType::Any),
            other => Err(DeclarationError::UnknownType(other.to_string())),
        }
    }
}

/// One positional parameter. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub optional: bool,
    pub variadic: bool,
    pub ty: ParamType,
    /// Allowed words for a choice parameter; empty otherwise
    pub choices: Vec<String>,
}

impl Parameter {
    pub fn is_choice(&self) -> bool {
        !self.choices.is_empty()
    }

    fn check(&self, value: &Value) -> Result<(), ArgumentError> {
        if self.is_choice() {
            let text = value.to_text();
            let valid = !matches!(value, Value::Block(_))
                && self.choices.iter().any(|c| c.eq_ignore_ascii_case(&text));
            if !valid {
                return Err(ArgumentError::InvalidChoice {
                    name: self.name.clone(),
                    value: text,
                    choices: self.choices.clone(),
                });
            }
            return Ok(());
        }

        if !self.ty.accepts(value) {
            return Err(ArgumentError::WrongType {
                name: self.name.clone(),
                expected: self.ty,
                found: value.kind(),
            });
        }
        Ok(())
    }
}

impl FromStr for Parameter {
    type Err = DeclarationError;

    fn from_str(decl: &str) -> Result<Self, Self::Err> {
        let decl = decl.trim();
        if decl.is_empty() {
            return Err(DeclarationError::Empty);
        }

        let optional = match (decl.chars().next(), decl.chars().last()) {
            (Some('<'), Some('>')) => false,
            (Some('['), Some(']')) => true,
            _ => return Err(DeclarationError::Malformed(decl.to_string())),
        };
        let inner = decl[1..decl.len() - 1].trim();

        let (inner, variadic) = match inner.strip_suffix(ELLIPSIS) {
            Some(rest) => (rest.trim_end(), true),
            None => (inner, false),
        };

        let (name, ty) = match inner.split_once(TYPE_SEPARATOR) {
            Some((name, ty)) => (name.trim(), ty.parse()?),
            None => (inner, ParamType::Any),
        };
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || "<>[]".contains(c)) {
            return Err(DeclarationError::Malformed(decl.to_string()));
        }

        let choices: Vec<String> = if name.contains(CHOICE_SEPARATOR) {
            let words: Vec<String> = name
                .split(CHOICE_SEPARATOR)
                .map(|w| w.trim().to_string())
                .collect();
            if words.iter().any(String::is_empty) {
                return Err(DeclarationError::Malformed(decl.to_string()));
            }
            words
        } else {
            Vec::new()
        };

        Ok(Parameter {
            name: name.to_string(),
            optional,
            variadic,
            ty,
            choices,
        })
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.optional { ('[', ']') } else { ('<', '>') };
        write!(f, "{}{}", open, self.name)?;
        if self.ty != ParamType::Any {
            write!(f, ":{}", self.ty)?;
        }
        if self.variadic {
            f.write_str(ELLIPSIS)?;
        }
        write!(f, "{}", close)
    }
}

/// A documented flag with its alternative names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub name: String,
    pub aliases: Vec<String>,
}

impl Flag {
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

impl FromStr for Flag {
    type Err = DeclarationError;

    fn from_str(decl: &str) -> Result<Self, Self::Err> {
        let mut names = decl
            .trim()
            .split(CHOICE_SEPARATOR)
            .map(|n| n.trim().trim_start_matches('-').to_string());

        let name = names.next().filter(|n| !n.is_empty()).ok_or(DeclarationError::Empty)?;
        let aliases: Vec<String> = names.collect();
        if aliases.iter().any(String::is_empty) {
            return Err(DeclarationError::Malformed(decl.to_string()));
        }
        Ok(Flag { name, aliases })
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}", self.name)?;
        for alias in &self.aliases {
            write!(f, "|{}", alias)?;
        }
        Ok(())
    }
}

/// Ordered parameter list of a command.
///
/// Arity policy: each required parameter consumes exactly one argument, each
/// optional parameter at most one, and a trailing variadic parameter every
/// remaining argument. A nested block is always a single argument. Each
/// consumed argument is checked against its parameter's type or choices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    pub fn new(params: Vec<Parameter>) -> Result<Self, DeclarationError> {
        let mut seen_optional = false;
        for (i, param) in params.iter().enumerate() {
            if param.variadic && i + 1 != params.len() {
                return Err(DeclarationError::VariadicNotLast(param.name.clone()));
            }
            if param.optional {
                seen_optional = true;
            } else if seen_optional {
                return Err(DeclarationError::RequiredAfterOptional(param.name.clone()));
            }
        }
        Ok(Self { params })
    }

    /// Parse a list of declaration strings
    pub fn parse<S: AsRef<str>>(decls: &[S]) -> Result<Self, DeclarationError> {
        let params = decls
            .iter()
            .map(|d| d.as_ref().parse())
            .collect::<Result<Vec<Parameter>, _>>()?;
        Self::new(params)
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn min_args(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    /// Upper bound on accepted arguments; `None` when variadic
    pub fn max_args(&self) -> Option<usize> {
        match self.params.last() {
            Some(p) if p.variadic => None,
            _ => Some(self.params.len()),
        }
    }

    pub fn check(&self, args: &[Value]) -> Result<(), ArgumentError> {
        if let Some(missing) = self.params.get(args.len()).filter(|p| !p.optional) {
            return Err(ArgumentError::Missing(missing.name.clone()));
        }
        if let Some(max) = self.max_args() {
            if args.len() > max {
                return Err(ArgumentError::TooMany {
                    expected: max,
                    got: args.len(),
                });
            }
        }

        for (i, arg) in args.iter().enumerate() {
            let param = match self.params.get(i) {
                Some(param) => param,
                // only reachable past the end when the last parameter is variadic
                None => match self.params.last() {
                    Some(last) => last,
                    None => break,
                },
            };
            param.check(arg)?;
        }
        Ok(())
    }

    /// Usage line such as `<user> [reason...]`
    pub fn usage(&self) -> String {
        self.params
            .iter()
            .map(Parameter::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
