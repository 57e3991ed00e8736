//! Invocation blocks.
//!
//! A [`Block`] is one parsed invocation: the command path, positional
//! arguments, flags, and nested blocks for bracketed sub-invocations.
//!
//! ```
//! use hark::{Block, Value};
//!
//! let block = Block::parse(r#"!foo.bar "a b" 1 {!baz}"#, "!").unwrap();
//! assert_eq!(block.cmd, "foo.bar");
//! assert_eq!(block.cmds, vec!["foo", "bar"]);
//! assert_eq!(block.args[0], Value::from("a b"));
//! assert_eq!(block.args[2].as_block().unwrap().cmd, "baz");
//! ```

use std::collections::BTreeMap;

use crate::lexer::{tokenize, ParseError, Token, TokenKind, BLOCK_CLOSE, BLOCK_OPEN, TERMINATOR};
use crate::value::Value;

/// Separator between command path segments
pub const PATH_DELIMITER: char = '.';

/// One parsed invocation.
#[derive(Debug, Clone)]
pub struct Block {
    /// Canonical rendering; re-tokenizes to an equivalent block
    pub text: String,
    /// Command prefix the invocation was written with (may be empty)
    pub prefix: String,
    /// Raw command token, prefix removed
    pub cmd: String,
    /// `cmd` split on the path delimiter
    pub cmds: Vec<String>,
    pub args: Vec<Value>,
    pub flags: BTreeMap<String, Option<Value>>,
    /// Comments seen while building, kept for diagnostics
    pub comments: Vec<String>,
    /// Nesting depth; zero for the outermost block
    pub depth: usize,
    /// False for plain chat text echoed as a block
    pub is_command: bool,
}

/// Structural equality over path, arguments and flags.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.is_command == other.is_command
            && self.cmd == other.cmd
            && self.cmds == other.cmds
            && self.args == other.args
            && self.flags == other.flags
    }
}

impl Block {
    /// Parse raw message text. Text starting with `prefix` is parsed as a
    /// command and malformed input is an error; anything else is echoed
    /// as a non-command block and never fails.
    pub fn parse(text: &str, prefix: &str) -> Result<Block, ParseError> {
        let builder = BlockBuilder::new(prefix);
        if text.trim_start().starts_with(prefix) {
            let tokens = tokenize(text)?;
            return builder.build(&tokens, true);
        }

        match tokenize(text) {
            Ok(tokens) => builder.build(&tokens, false),
            Err(_) => Ok(Block::echo(text)),
        }
    }

    /// Non-command block over whitespace-separated words, without tokenizing.
    pub fn echo(text: &str) -> Block {
        Block {
            text: text.trim().to_string(),
            prefix: String::new(),
            cmd: String::new(),
            cmds: Vec::new(),
            args: text.split_whitespace().map(Value::from).collect(),
            flags: BTreeMap::new(),
            comments: Vec::new(),
            depth: 0,
            is_command: false,
        }
    }

    /// All positional arguments joined by single spaces
    pub fn arg(&self) -> String {
        self.args
            .iter()
            .map(Value::to_text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    /// Value of a flag; `None` when absent or given without a value
    pub fn flag(&self, name: &str) -> Option<&Value> {
        self.flags.get(name).and_then(Option::as_ref)
    }

    /// Directly nested blocks, in argument order
    pub fn children(&self) -> impl Iterator<Item = &Block> {
        self.args.iter().filter_map(Value::as_block)
    }

    /// Every (enclosing, nested) pair, depth first
    pub fn walk(&self) -> Vec<(&Block, &Block)> {
        let mut pairs = Vec::new();
        for child in self.children() {
            pairs.push((self, child));
            pairs.extend(child.walk());
        }
        pairs
    }

    /// Re-render `text` from the structured fields
    pub fn render(&self) -> String {
        if !self.is_command {
            return self.text.clone();
        }

        // the command word is quoted like any string argument
        let head = if self.cmd.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{}", self.prefix, Value::Str(self.cmd.clone()))
        };
        let mut parts = vec![head];
        parts.extend(self.args.iter().map(Value::to_string));
        for (name, value) in &self.flags {
            match value {
                Some(value) => parts.push(format!("-{}:{}", name, value)),
                None => parts.push(format!("-{}", name)),
            }
        }
        parts.join(" ")
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Consumes tokens into blocks.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    prefix: String,
}

impl BlockBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Build a block. Without `as_command` the tokens are echoed flat.
    pub fn build(&self, tokens: &[Token], as_command: bool) -> Result<Block, ParseError> {
        if as_command {
            self.build_command(tokens, 0)
        } else {
            Ok(self.build_echo(tokens))
        }
    }

    fn build_echo(&self, tokens: &[Token]) -> Block {
        let mut block = Block::echo("");
        for token in tokens {
            let arg = match &token.kind {
                TokenKind::Word(value) => value.clone(),
                TokenKind::Flag { name, value: None } => Value::Str(format!("-{}", name)),
                TokenKind::Flag {
                    name,
                    value: Some(value),
                } => Value::Str(format!("-{}:{}", name, value.to_text())),
                TokenKind::Open => Value::Str(BLOCK_OPEN.to_string()),
                TokenKind::Close => Value::Str(BLOCK_CLOSE.to_string()),
                TokenKind::Terminator => Value::Str(TERMINATOR.to_string()),
                TokenKind::Comment(comment) => {
                    block.comments.push(comment.clone());
                    continue;
                }
            };
            block.args.push(arg);
        }
        block.text = block.arg();
        block
    }

    fn build_command(&self, tokens: &[Token], depth: usize) -> Result<Block, ParseError> {
        let mut block = Block {
            text: String::new(),
            prefix: String::new(),
            cmd: String::new(),
            cmds: Vec::new(),
            args: Vec::new(),
            flags: BTreeMap::new(),
            comments: Vec::new(),
            depth,
            is_command: true,
        };

        let mut rest = tokens;
        while let Some((first, tail)) = rest.split_first() {
            match &first.kind {
                TokenKind::Comment(comment) => {
                    block.comments.push(comment.clone());
                    rest = tail;
                }
                TokenKind::Word(value) => {
                    let raw = value.to_text();
                    match raw.strip_prefix(self.prefix.as_str()) {
                        Some(cmd) if !self.prefix.is_empty() => {
                            block.prefix = self.prefix.clone();
                            block.cmd = cmd.to_string();
                        }
                        _ => block.cmd = raw,
                    }
                    rest = tail;
                    break;
                }
                _ => break,
            }
        }

        if !block.cmd.is_empty() {
            block.cmds = block
                .cmd
                .split(PATH_DELIMITER)
                .map(str::to_string)
                .collect();
        }

        let mut scope = 0usize;
        let mut open_pos = 0usize;
        let mut span: Vec<Token> = Vec::new();
        let mut remaining = rest.iter();

        for token in remaining.by_ref() {
            match &token.kind {
                TokenKind::Open => {
                    if scope == 0 {
                        open_pos = token.pos;
                        span.clear();
                    } else {
                        span.push(token.clone());
                    }
                    scope += 1;
                }
                TokenKind::Close => {
                    if scope == 0 {
                        return Err(ParseError::UnmatchedClose(token.pos));
                    }
                    scope -= 1;
                    if scope == 0 {
                        let child = self.build_command(&span, depth + 1)?;
                        block.args.push(Value::Block(Box::new(child)));
                    } else {
                        span.push(token.clone());
                    }
                }
                _ if scope > 0 => span.push(token.clone()),
                TokenKind::Terminator => break,
                TokenKind::Comment(comment) => block.comments.push(comment.clone()),
                TokenKind::Flag { name, value } => {
                    block.flags.insert(name.clone(), value.clone());
                }
                TokenKind::Word(value) => block.args.push(value.clone()),
            }
        }

        if scope > 0 {
            return Err(ParseError::UnmatchedOpen(open_pos));
        }
        check_balance(remaining.as_slice())?;

        block.text = block.render();
        Ok(block)
    }
}

/// Statements after an early stop are discarded but must still be balanced.
fn check_balance(tokens: &[Token]) -> Result<(), ParseError> {
    let mut opens: Vec<usize> = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Open => opens.push(token.pos),
            TokenKind::Close => {
                if opens.pop().is_none() {
                    return Err(ParseError::UnmatchedClose(token.pos));
                }
            }
            _ => {}
        }
    }
    match opens.first() {
        Some(&pos) => Err(ParseError::UnmatchedOpen(pos)),
        None => Ok(()),
    }
}
