//! Tokenizer for the command language.
//!
//! Lexical rules, highest priority first:
//!
//! 1. `\` takes the next character literally.
//! 2. `"` toggles a literal span; nothing else applies until it closes.
//! 3. ```` ```lang ```` opens a multi-line literal running to the next ```` ``` ````.
//! 4. `//` (to end of line) and `/* ... */` at the start of a token are comments.
//! 5. `$(`, `$[` or `${` open a balanced expression literal.
//! 6. `{`, `}` and `;` are always tokens of their own, even inside a word.
//! 7. `-name` or `-name:value` is a flag unless the word is a negative number.
//! 8. Whitespace separates tokens.
//! 9. Anything else is a word, cast to number/bool/string by shape.

use thiserror::Error;

use crate::value::{closing_bracket, is_numeric, Code, Expr, Value};

pub const ESCAPE: char = '\\';
pub const QUOTE: char = '"';
pub const BLOCK_OPEN: char = '{';
pub const BLOCK_CLOSE: char = '}';
pub const TERMINATOR: char = ';';
pub const FLAG_PREFIX: char = '-';
pub const KEY_SEPARATOR: char = ':';
pub const EXPR_PREFIX: char = '$';
pub const FENCE: &str = "```";

/// Errors for malformed input. Scoped to one invocation; positions are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated quote starting at byte {0}")]
    UnterminatedQuote(usize),

    #[error("unterminated code block starting at byte {0}")]
    UnterminatedCode(usize),

    #[error("unterminated expression starting at byte {0}")]
    UnterminatedExpression(usize),

    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),

    #[error("unmatched '{{' at byte {0}")]
    UnmatchedOpen(usize),

    #[error("unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),
}

impl ParseError {
    /// Byte offset of the offending delimiter
    pub fn position(&self) -> usize {
        match self {
            ParseError::UnterminatedQuote(p)
            | ParseError::UnterminatedCode(p)
            | ParseError::UnterminatedExpression(p)
            | ParseError::UnterminatedComment(p)
            | ParseError::UnmatchedOpen(p)
            | ParseError::UnmatchedClose(p) => *p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A typed value: word, quoted string, expression or code literal
    Word(Value),
    Flag {
        name: String,
        value: Option<Value>,
    },
    Open,
    Close,
    Terminator,
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token start
    pub pos: usize,
}

/// Scan raw text into tokens.
pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(text).run()
}

fn is_standalone(c: char) -> bool {
    matches!(c, BLOCK_OPEN | BLOCK_CLOSE | TERMINATOR)
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    i: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            i: 0,
        }
    }

    fn offset(&self, i: usize) -> usize {
        self.chars.get(i).map(|&(o, _)| o).unwrap_or(self.src.len())
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).map(|&(_, c)| c)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.offset(self.i)..]
    }

    fn at_token_end(&self) -> bool {
        match self.peek(0) {
            None => true,
            Some(c) => c.is_whitespace() || is_standalone(c),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek(0) {
            if c.is_whitespace() {
                self.i += 1;
                continue;
            }

            let pos = self.offset(self.i);
            let kind = match c {
                BLOCK_OPEN => {
                    self.i += 1;
                    TokenKind::Open
                }
                BLOCK_CLOSE => {
                    self.i += 1;
                    TokenKind::Close
                }
                TERMINATOR => {
                    self.i += 1;
                    TokenKind::Terminator
                }
                '/' if self.peek(1) == Some('/') => self.line_comment(),
                '/' if self.peek(1) == Some('*') => self.block_comment(pos)?,
                '`' if self.rest().starts_with(FENCE) => TokenKind::Word(self.code(pos)?),
                EXPR_PREFIX if self.peek(1).and_then(closing_bracket).is_some() => {
                    TokenKind::Word(self.expression(pos)?)
                }
                FLAG_PREFIX => self.flag_or_word()?,
                _ => TokenKind::Word(self.word()?),
            };

            tokens.push(Token { kind, pos });
        }

        Ok(tokens)
    }

    fn line_comment(&mut self) -> TokenKind {
        self.i += 2;
        let mut body = String::new();
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            body.push(c);
            self.i += 1;
        }
        TokenKind::Comment(body.trim().to_string())
    }

    fn block_comment(&mut self, start: usize) -> Result<TokenKind, ParseError> {
        self.i += 2;
        let mut body = String::new();
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some('*'), Some('/')) => {
                    self.i += 2;
                    return Ok(TokenKind::Comment(body.trim().to_string()));
                }
                (Some(c), _) => {
                    body.push(c);
                    self.i += 1;
                }
                (None, _) => return Err(ParseError::UnterminatedComment(start)),
            }
        }
    }

    fn code(&mut self, start: usize) -> Result<Value, ParseError> {
        self.i += FENCE.len();
        let content_start = self.offset(self.i);
        let Some(len) = self.src[content_start..].find(FENCE) else {
            return Err(ParseError::UnterminatedCode(start));
        };
        let content = &self.src[content_start..content_start + len];

        // skip the content and the closing fence
        let end = content_start + len + FENCE.len();
        while self.offset(self.i) < end {
            self.i += 1;
        }

        let code = match content.split_once('\n') {
            Some((lang, body)) => Code {
                lang: lang.trim().to_string(),
                body: body.to_string(),
            },
            None => Code {
                lang: String::new(),
                body: content.to_string(),
            },
        };
        Ok(Value::Code(code))
    }

    fn expression(&mut self, start: usize) -> Result<Value, ParseError> {
        let open = self.peek(1).unwrap_or_default();
        let close = closing_bracket(open).unwrap_or(open);
        self.i += 2;

        let mut depth = 1usize;
        let mut body = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ParseError::UnterminatedExpression(start));
            };
            self.i += 1;

            if c == ESCAPE {
                body.push(c);
                if let Some(next) = self.peek(0) {
                    body.push(next);
                    self.i += 1;
                }
                continue;
            }
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            body.push(c);
        }

        Ok(Value::Expr(Expr { open, body }))
    }

    fn flag_or_word(&mut self) -> Result<TokenKind, ParseError> {
        let mut end = self.i;
        while let Some(&(_, c)) = self.chars.get(end) {
            if c.is_whitespace() || is_standalone(c) {
                break;
            }
            end += 1;
        }
        let raw = &self.src[self.offset(self.i)..self.offset(end)];
        if is_numeric(raw) {
            return Ok(TokenKind::Word(self.word()?));
        }

        let mut name_end = self.i;
        while let Some(&(_, c)) = self.chars.get(name_end) {
            if c.is_whitespace() || is_standalone(c) || c == KEY_SEPARATOR {
                break;
            }
            name_end += 1;
        }
        let name = self.src[self.offset(self.i)..self.offset(name_end)]
            .trim_start_matches(FLAG_PREFIX)
            .to_string();
        if name.is_empty() {
            return Ok(TokenKind::Word(self.word()?));
        }

        self.i = name_end;
        let value = if self.peek(0) == Some(KEY_SEPARATOR) {
            self.i += 1;
            Some(self.flag_value()?)
        } else {
            None
        };

        Ok(TokenKind::Flag { name, value })
    }

    fn flag_value(&mut self) -> Result<Value, ParseError> {
        let pos = self.offset(self.i);
        if self.at_token_end() {
            return Ok(Value::Str(String::new()));
        }
        if self.rest().starts_with(FENCE) {
            return self.code(pos);
        }
        if self.peek(0) == Some(EXPR_PREFIX) && self.peek(1).and_then(closing_bracket).is_some() {
            return self.expression(pos);
        }
        self.word()
    }

    fn word(&mut self) -> Result<Value, ParseError> {
        let mut buf = String::new();
        let mut literal = false;
        let mut quote_start: Option<usize> = None;

        while let Some(&(offset, c)) = self.chars.get(self.i) {
            if c == ESCAPE {
                literal = true;
                self.i += 1;
                match self.peek(0) {
                    Some(next) => {
                        buf.push(next);
                        self.i += 1;
                    }
                    None => buf.push(ESCAPE),
                }
                continue;
            }
            if c == QUOTE {
                literal = true;
                quote_start = match quote_start {
                    Some(_) => None,
                    None => Some(offset),
                };
                self.i += 1;
                continue;
            }
            if quote_start.is_none() && (c.is_whitespace() || is_standalone(c)) {
                break;
            }
            buf.push(c);
            self.i += 1;
        }

        if let Some(start) = quote_start {
            return Err(ParseError::UnterminatedQuote(start));
        }

        Ok(if literal {
            Value::Str(buf)
        } else {
            Value::cast(&buf)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn word(v: impl Into<Value>) -> TokenKind {
        TokenKind::Word(v.into())
    }

    #[test]
    fn test_words_are_cast() {
        assert_eq!(
            kinds("!roll 6 true abc"),
            vec![word("!roll"), word(6.0), word(true), word("abc")]
        );
    }

    #[test]
    fn test_quotes_and_escapes() {
        assert_eq!(kinds(r#""a b" \"x"#), vec![word("a b"), word("\"x")]);
        // quoted text is never cast
        assert_eq!(kinds(r#""12""#), vec![word("12")]);
        // quote toggles inside a word
        assert_eq!(kinds(r#"a"b c"d"#), vec![word("ab cd")]);
        assert_eq!(kinds(r#""{;}""#), vec![word("{;}")]);
    }

    #[test]
    fn test_standalone_characters() {
        assert_eq!(
            kinds("a{b}c;d"),
            vec![
                word("a"),
                TokenKind::Open,
                word("b"),
                TokenKind::Close,
                word("c"),
                TokenKind::Terminator,
                word("d"),
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("a // trailing\nb /* inline */ c"),
            vec![
                word("a"),
                TokenKind::Comment("trailing".into()),
                word("b"),
                TokenKind::Comment("inline".into()),
                word("c"),
            ]
        );
        // only at token start
        assert_eq!(kinds("http://x"), vec![word("http://x")]);
    }

    #[test]
    fn test_code_block() {
        let tokens = kinds("!eval ```rust\nfn main() {}\n```");
        assert_eq!(
            tokens[1],
            TokenKind::Word(Value::Code(Code {
                lang: "rust".into(),
                body: "fn main() {}\n".into(),
            }))
        );
    }

    #[test]
    fn test_expression_nesting_and_escapes() {
        let tokens = kinds(r"$(a (b) \) c) d");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Word(Value::Expr(Expr {
                    open: '(',
                    body: r"a (b) \) c".into(),
                })),
                word("d"),
            ]
        );
        // only the matching bracket pair counts
        let tokens = kinds("${ ( }");
        assert_eq!(
            tokens,
            vec![TokenKind::Word(Value::Expr(Expr {
                open: '{',
                body: " ( ".into(),
            }))]
        );
    }

    #[test]
    fn test_flags() {
        assert_eq!(
            kinds("-v -count:3 -name:\"a b\" --long"),
            vec![
                TokenKind::Flag {
                    name: "v".into(),
                    value: None
                },
                TokenKind::Flag {
                    name: "count".into(),
                    value: Some(Value::Num(3.0))
                },
                TokenKind::Flag {
                    name: "name".into(),
                    value: Some(Value::Str("a b".into()))
                },
                TokenKind::Flag {
                    name: "long".into(),
                    value: None
                },
            ]
        );
    }

    #[test]
    fn test_negative_numbers_are_not_flags() {
        assert_eq!(kinds("-5 -2.5 -"), vec![word(-5.0), word(-2.5), word("-")]);
    }

    #[test]
    fn test_unterminated_spans() {
        assert_eq!(tokenize("say \"oops"), Err(ParseError::UnterminatedQuote(4)));
        assert_eq!(tokenize("x ```js\nlet"), Err(ParseError::UnterminatedCode(2)));
        assert_eq!(tokenize("$(1 + (2)"), Err(ParseError::UnterminatedExpression(0)));
        assert_eq!(tokenize("/* never"), Err(ParseError::UnterminatedComment(0)));
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        let tokens = tokenize("é {x}").unwrap();
        assert_eq!(tokens[1].pos, 3);
    }
}
