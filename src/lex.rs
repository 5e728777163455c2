use std::fmt::Display;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;
use tracing::trace;

fn line_of(src: &str, offset: usize) -> usize {
    src[..offset.min(src.len())].matches('\n').count() + 1
}

#[derive(Error, Debug, Diagnostic)]
#[error("unterminated string literal")]
#[diagnostic(
    code(mython::lex::unterminated_string),
    help("close the string with the same quote it was opened with, on the same line")
)]
pub struct StringTerminationError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this string never ends")]
    bad_string: SourceSpan,
}

impl StringTerminationError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_string.offset())
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("unknown escape sequence `\\{escape}`")]
#[diagnostic(
    code(mython::lex::unknown_escape),
    help("supported escapes are \\n, \\t, \\', \\\" and \\\\")
)]
pub struct EscapeError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this escape")]
    bad_escape: SourceSpan,

    pub escape: char,
}

impl EscapeError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_escape.offset())
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("indentation grows from level {from} to level {to}")]
#[diagnostic(
    code(mython::lex::indentation),
    help("a block may only be indented one level (two spaces) deeper than its header")
)]
pub struct IndentError {
    #[source_code]
    src: NamedSource<String>,

    #[label("too much indentation")]
    bad_indent: SourceSpan,

    pub from: usize,
    pub to: usize,
}

impl IndentError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_indent.offset())
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("invalid integer literal: {source}")]
#[diagnostic(code(mython::lex::number))]
pub struct NumberError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this numeric literal")]
    bad_number: SourceSpan,

    source: std::num::ParseIntError,
}

impl NumberError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_number.offset())
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("expected {expected}, found {found}")]
#[diagnostic(code(mython::lex::unexpected_token))]
pub struct UnexpectedTokenError {
    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    bad_token: SourceSpan,

    pub expected: String,
    pub found: Token,
}

impl UnexpectedTokenError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_token.offset())
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum LexError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    StringTermination(#[from] StringTerminationError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Escape(#[from] EscapeError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Indent(#[from] IndentError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Number(#[from] NumberError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Unexpected(#[from] UnexpectedTokenError),
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::StringTermination(e) => e.line(),
            LexError::Escape(e) => e.line(),
            LexError::Indent(e) => e.line(),
            LexError::Number(e) => e.line(),
            LexError::Unexpected(e) => e.line(),
        }
    }
}

/// One lexical unit of a mython program.
///
/// Only identifiers, literals and single-character operators carry a payload;
/// two tokens are equal when both their kind and their payload match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Number(i32),
    Id(String),
    Char(char),
    String(String),
    Class,
    Return,
    If,
    Else,
    Def,
    Newline,
    Print,
    Indent,
    Dedent,
    Eof,
    And,
    Or,
    Not,
    Eq,
    NotEq,
    LessOrEq,
    GreaterOrEq,
    None,
    True,
    False,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "Number{{{n}}}"),
            Token::Id(id) => write!(f, "Id{{{id}}}"),
            Token::Char(c) => write!(f, "Char{{{c}}}"),
            Token::String(s) => write!(f, "String{{{s}}}"),
            Token::Class => write!(f, "Class"),
            Token::Return => write!(f, "Return"),
            Token::If => write!(f, "If"),
            Token::Else => write!(f, "Else"),
            Token::Def => write!(f, "Def"),
            Token::Newline => write!(f, "Newline"),
            Token::Print => write!(f, "Print"),
            Token::Indent => write!(f, "Indent"),
            Token::Dedent => write!(f, "Dedent"),
            Token::Eof => write!(f, "Eof"),
            Token::And => write!(f, "And"),
            Token::Or => write!(f, "Or"),
            Token::Not => write!(f, "Not"),
            Token::Eq => write!(f, "Eq"),
            Token::NotEq => write!(f, "NotEq"),
            Token::LessOrEq => write!(f, "LessOrEq"),
            Token::GreaterOrEq => write!(f, "GreaterOrEq"),
            Token::None => write!(f, "None"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
        }
    }
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "class" => Token::Class,
        "return" => Token::Return,
        "if" => Token::If,
        "else" => Token::Else,
        "def" => Token::Def,
        "print" => Token::Print,
        "or" => Token::Or,
        "None" => Token::None,
        "and" => Token::And,
        "not" => Token::Not,
        "True" => Token::True,
        "False" => Token::False,
        _ => return None,
    })
}

fn is_operator(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '=' | '>' | '<' | '!' | ':' | '(' | ')' | '.' | ','
    )
}

/// Indentation is measured in units of this many spaces.
const INDENT_WIDTH: usize = 2;

/// Turns mython source into tokens one at a time.
///
/// The lexer always holds the most recently produced token, starting with the
/// first one, which is scanned eagerly by [`Lexer::new`]. Once [`Token::Eof`]
/// has been produced, advancing keeps returning it.
pub struct Lexer<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    rest: &'de str,
    byte: usize,
    line_start: bool,
    indent: usize,
    dedent_debt: usize,
    token_start: usize,
    current: Token,
    span: SourceSpan,
    failed: bool,
    yielded: bool,
}

impl<'de> Lexer<'de> {
    pub fn new(filename: Option<&'de str>, input: &'de str) -> Result<Self, LexError> {
        let mut lexer = Lexer {
            filename,
            whole: input,
            rest: input,
            byte: 0,
            line_start: true,
            indent: 0,
            dedent_debt: 0,
            token_start: 0,
            current: Token::Eof,
            span: SourceSpan::from(0..0),
            failed: false,
            yielded: false,
        };
        lexer.advance()?;
        Ok(lexer)
    }

    pub fn current_token(&self) -> &Token {
        &self.current
    }

    pub fn next_token(&mut self) -> Result<&Token, LexError> {
        if self.current != Token::Eof {
            self.advance()?;
        }
        Ok(&self.current)
    }

    pub fn expect(&self, expected: &Token) -> Result<&Token, LexError> {
        if self.current == *expected {
            Ok(&self.current)
        } else {
            Err(self.unexpected(expected.to_string()))
        }
    }

    pub fn expect_next(&mut self, expected: &Token) -> Result<&Token, LexError> {
        self.next_token()?;
        self.expect(expected)
    }

    pub fn expect_id(&self) -> Result<&str, LexError> {
        match &self.current {
            Token::Id(id) => Ok(id),
            _ => Err(self.unexpected("an identifier".to_string())),
        }
    }

    pub fn expect_next_id(&mut self) -> Result<&str, LexError> {
        self.next_token()?;
        self.expect_id()
    }

    fn unexpected(&self, expected: String) -> LexError {
        UnexpectedTokenError {
            src: self.source(),
            bad_token: self.span,
            expected,
            found: self.current.clone(),
        }
        .into()
    }

    fn source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    fn advance(&mut self) -> Result<(), LexError> {
        let token = self.scan()?;
        self.span = SourceSpan::from(self.token_start..self.byte);
        self.current = token;
        Ok(())
    }

    fn bump(&mut self, len: usize) {
        self.rest = &self.rest[len..];
        self.byte += len;
    }

    fn at_line_break(&self) -> bool {
        self.rest.starts_with('\n') || self.rest.starts_with("\r\n")
    }

    fn skip_line_break(&mut self) {
        if self.rest.starts_with("\r\n") {
            self.bump(2);
        } else {
            self.bump(1);
        }
    }

    fn skip_comment(&mut self) {
        let end = self.rest.find('\n').unwrap_or(self.rest.len());
        let end = if self.rest[..end].ends_with('\r') {
            end - 1
        } else {
            end
        };
        self.bump(end);
    }

    fn scan(&mut self) -> Result<Token, LexError> {
        loop {
            self.token_start = self.byte;

            if self.dedent_debt > 0 {
                self.dedent_debt -= 1;
                self.indent -= 1;
                trace!(level = self.indent, "dedent");
                return Ok(Token::Dedent);
            }
            if self.line_start && self.at_line_break() {
                self.skip_line_break();
                continue;
            }
            if self.rest.starts_with('#') {
                self.skip_comment();
                continue;
            }
            if self.line_start && self.rest.starts_with('\r') {
                // a bare carriage return is not content
                self.bump(1);
                continue;
            }
            if self.line_start && self.indent > 0 && !self.rest.starts_with(' ') {
                // content at column zero gives up every open level
                self.dedent_debt = self.indent - 1;
                self.indent -= 1;
                trace!(level = self.indent, "dedent");
                return Ok(Token::Dedent);
            }

            let Some(c) = self.rest.chars().next() else {
                if !self.line_start {
                    self.line_start = true;
                    return Ok(Token::Newline);
                }
                return Ok(Token::Eof);
            };

            if c == ' ' && self.line_start {
                let spaces = self.rest.len() - self.rest.trim_start_matches(' ').len();
                self.bump(spaces);
                if self.rest.is_empty() || self.at_line_break() || self.rest.starts_with('#') {
                    // blank or comment-only line
                    continue;
                }
                self.line_start = false;

                let level = spaces / INDENT_WIDTH;
                if level == self.indent {
                    continue;
                }
                if level == self.indent + 1 {
                    self.indent += 1;
                    trace!(level = self.indent, "indent");
                    return Ok(Token::Indent);
                }
                if level < self.indent {
                    self.dedent_debt = self.indent - 1 - level;
                    self.indent -= 1;
                    trace!(level = self.indent, "dedent");
                    return Ok(Token::Dedent);
                }
                return Err(IndentError {
                    src: self.source(),
                    bad_indent: SourceSpan::from(self.token_start..self.byte),
                    from: self.indent,
                    to: level,
                }
                .into());
            }

            match c {
                '\n' => {
                    self.bump(1);
                    self.line_start = true;
                    return Ok(Token::Newline);
                }
                c if c.is_whitespace() => {
                    self.bump(c.len_utf8());
                    continue;
                }
                _ => {}
            }

            self.line_start = false;
            return match c {
                '"' | '\'' => self.string(c),
                '0'..='9' => self.number(),
                c if c.is_ascii_alphabetic() || c == '_' => Ok(self.identifier()),
                c if is_operator(c) => Ok(self.operator(c)),
                _ => Ok(self.general()),
            };
        }
    }

    fn string(&mut self, quote: char) -> Result<Token, LexError> {
        let open = self.byte;
        self.bump(quote.len_utf8());
        let rest = self.rest;
        let body_start = self.byte;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        loop {
            let unterminated = |lexer: &Self, end: usize| -> LexError {
                StringTerminationError {
                    src: lexer.source(),
                    bad_string: SourceSpan::from(open..end),
                }
                .into()
            };

            let Some((i, ch)) = chars.next() else {
                self.bump(rest.len());
                return Err(unterminated(self, self.byte));
            };
            match ch {
                '\\' => {
                    let Some((j, escaped)) = chars.next() else {
                        self.bump(rest.len());
                        return Err(unterminated(self, self.byte));
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        '\'' => '\'',
                        '"' => '"',
                        '\\' => '\\',
                        other => {
                            let end = j + other.len_utf8();
                            self.bump(end);
                            return Err(EscapeError {
                                src: self.source(),
                                bad_escape: SourceSpan::from(body_start + i..body_start + end),
                                escape: other,
                            }
                            .into());
                        }
                    });
                }
                '\n' | '\r' => {
                    self.bump(i);
                    return Err(unterminated(self, self.byte));
                }
                ch if ch == quote => {
                    self.bump(i + ch.len_utf8());
                    return Ok(Token::String(value));
                }
                ch => value.push(ch),
            }
        }
    }

    fn number(&mut self) -> Result<Token, LexError> {
        let rest = self.rest;
        let len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let literal = &rest[..len];
        self.bump(len);

        match literal.parse() {
            Ok(n) => Ok(Token::Number(n)),
            Err(source) => Err(NumberError {
                src: self.source(),
                bad_number: SourceSpan::from(self.byte - len..self.byte),
                source,
            }
            .into()),
        }
    }

    fn identifier(&mut self) -> Token {
        let rest = self.rest;
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let literal = &rest[..len];
        self.bump(len);

        keyword(literal).unwrap_or_else(|| Token::Id(literal.to_string()))
    }

    fn operator(&mut self, c: char) -> Token {
        self.bump(c.len_utf8());
        if matches!(c, '!' | '=' | '<' | '>') && self.rest.starts_with('=') {
            self.bump(1);
            return match c {
                '!' => Token::NotEq,
                '=' => Token::Eq,
                '<' => Token::LessOrEq,
                _ => Token::GreaterOrEq,
            };
        }
        Token::Char(c)
    }

    /// Anything the other scanners reject is gathered up to the next
    /// separator and handed to the parser as an identifier.
    fn general(&mut self) -> Token {
        let rest = self.rest;
        let first = rest.chars().next().map_or(0, char::len_utf8);
        let len = rest[first..]
            .find(|c: char| c.is_whitespace() || is_operator(c) || matches!(c, '"' | '\'' | '#'))
            .map_or(rest.len(), |i| first + i);
        let literal = &rest[..len];
        self.bump(len);
        Token::Id(literal.to_string())
    }
}

/// Yields every token before [`Token::Eof`], stopping after the first error.
impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.yielded {
            if let Err(e) = self.next_token().map(|_| ()) {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.yielded = true;
        match self.current {
            Token::Eof => None,
            ref token => Some(Ok(token.clone())),
        }
    }
}
