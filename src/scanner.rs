//! Tokenization. Two interchangeable scanners share one character-level
//! cursor: `EagerScanner` tokenizes the whole source up front, `LazyScanner`
//! pulls tokens on demand.

use std::iter::Peekable;
use std::mem;
use std::str::Chars;

use crate::error::{Error, ErrorKind, Result};
use crate::token::{keyword_match, Token, TokenKind};

/// The common surface the compiler drives. `advance` returns the token that
/// just became `previous`.
pub trait Scanner {
    fn current(&self) -> &Token;
    fn previous(&self) -> &Token;
    fn advance(&mut self) -> Result<Token>;

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn check(&self, kind: TokenKind) -> bool {
        !self.is_at_end() && self.current().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> Result<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &'static str) -> Result<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            let current = self.current();
            Err(Error::with_lexeme(
                ErrorKind::Expected(message),
                current.line,
                &current.lexeme,
            ))
        }
    }

    /// Panic-mode recovery: skip forward until just past a semicolon or to a
    /// token that can start a statement.
    fn synchronize(&mut self) {
        let _ = self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.current().kind {
                TokenKind::Class
                | TokenKind::For
                | TokenKind::Fun
                | TokenKind::If
                | TokenKind::Print
                | TokenKind::Return
                | TokenKind::Var
                | TokenKind::While => return,
                _ => {
                    // A scan error here still consumed input, so keep going.
                    let _ = self.advance();
                }
            }
        }
    }
}

/// Character-level scanning state shared by both scanner implementations.
struct Cursor<'a> {
    iter: Peekable<Chars<'a>>,
    line: u32,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Cursor {
            iter: source.chars().peekable(),
            line: 1,
        }
    }

    /// Produces the next token, skipping whitespace and comments. At the end
    /// of input this returns `Eof` tokens forever.
    fn next_token(&mut self) -> Result<Token> {
        use TokenKind::*;

        let first = loop {
            match self.iter.next() {
                Some(' ') | Some('\t') | Some('\r') | Some('\0') => continue,
                Some('\n') => {
                    self.line += 1;
                    continue;
                }
                Some('/') => match self.iter.peek() {
                    Some('/') => {
                        while let Some(c) = self.iter.next() {
                            if c == '\n' {
                                self.line += 1;
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        self.iter.next();
                        self.block_comment()?;
                        continue;
                    }
                    _ => break '/',
                },
                Some(c) => break c,
                None => return Ok(Token::eof(self.line)),
            }
        };

        let line = self.line;
        let single = |kind, text: &str| Ok(Token::new(kind, text, line));
        match first {
            '(' => single(LeftParen, "("),
            ')' => single(RightParen, ")"),
            '{' => single(LeftBrace, "{"),
            '}' => single(RightBrace, "}"),
            ',' => single(Comma, ","),
            '.' => single(Dot, "."),
            ';' => single(Semicolon, ";"),
            ':' => single(Colon, ":"),
            '?' => single(Question, "?"),
            '-' => {
                if self.try_next('-') {
                    single(MinusMinus, "--")
                } else if self.try_next('=') {
                    single(MinusEqual, "-=")
                } else {
                    single(Minus, "-")
                }
            }
            '+' => {
                if self.try_next('+') {
                    single(PlusPlus, "++")
                } else if self.try_next('=') {
                    single(PlusEqual, "+=")
                } else {
                    single(Plus, "+")
                }
            }
            '/' => {
                if self.try_next('=') {
                    single(SlashEqual, "/=")
                } else {
                    single(Slash, "/")
                }
            }
            '*' => {
                if self.try_next('=') {
                    single(StarEqual, "*=")
                } else {
                    single(Star, "*")
                }
            }
            '!' => {
                if self.try_next('=') {
                    single(BangEqual, "!=")
                } else {
                    single(Bang, "!")
                }
            }
            '=' => {
                if self.try_next('=') {
                    single(EqualEqual, "==")
                } else {
                    single(Equal, "=")
                }
            }
            '>' => {
                if self.try_next('=') {
                    single(GreaterEqual, ">=")
                } else {
                    single(Greater, ">")
                }
            }
            '<' => {
                if self.try_next('=') {
                    single(LessEqual, "<=")
                } else {
                    single(Less, "<")
                }
            }
            '"' => self.string(),
            c if c.is_ascii_digit() => Ok(self.number(c)),
            c if c.is_ascii_alphabetic() => Ok(self.identifier(c)),
            c => Err(Error::new(ErrorKind::UnknownChar(c), line)),
        }
    }

    fn try_next(&mut self, expected: char) -> bool {
        match self.iter.peek() {
            Some(&c) if c == expected => {
                self.iter.next();
                true
            }
            _ => false,
        }
    }

    /// Skips a `/* ... */` comment. The opening delimiter is already consumed.
    fn block_comment(&mut self) -> Result<()> {
        loop {
            match self.iter.next() {
                Some('*') => {
                    if self.try_next('/') {
                        return Ok(());
                    }
                }
                Some('\n') => self.line += 1,
                Some(_) => (),
                None => return Err(Error::new(ErrorKind::UnterminatedBlockComment, self.line)),
            }
        }
    }

    /// Scans a string literal. The lexeme is the contents without the
    /// surrounding quotes; a backslash keeps the next character raw.
    fn string(&mut self) -> Result<Token> {
        let start_line = self.line;
        let mut contents = String::new();
        loop {
            match self.iter.next() {
                Some('"') => break,
                Some('\\') => {
                    contents.push('\\');
                    match self.iter.next() {
                        Some(c) => {
                            if c == '\n' {
                                self.line += 1;
                            }
                            contents.push(c);
                        }
                        None => {
                            return Err(Error::new(ErrorKind::UnterminatedString, self.line));
                        }
                    }
                }
                Some('\n') => {
                    self.line += 1;
                    contents.push('\n');
                }
                Some(c) => contents.push(c),
                None => return Err(Error::new(ErrorKind::UnterminatedString, self.line)),
            }
        }
        Ok(Token::new(TokenKind::Str, contents, start_line))
    }

    /// Scans a number: digits, then optionally a `.` followed by at least one
    /// digit. A trailing `.` with no fraction is left for the next token.
    fn number(&mut self, first: char) -> Token {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.iter.peek() {
            if c.is_ascii_digit() {
                text.push(*c);
                self.iter.next();
            } else {
                break;
            }
        }

        if let Some('.') = self.iter.peek() {
            let mut ahead = self.iter.clone();
            ahead.next();
            if matches!(ahead.peek(), Some(c) if c.is_ascii_digit()) {
                text.push('.');
                self.iter.next();
                while let Some(c) = self.iter.peek() {
                    if c.is_ascii_digit() {
                        text.push(*c);
                        self.iter.next();
                    } else {
                        break;
                    }
                }
            }
        }

        Token::new(TokenKind::Number, text, self.line)
    }

    fn identifier(&mut self, first: char) -> Token {
        let mut word = String::new();
        word.push(first);
        while let Some(&c) = self.iter.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.iter.next();
            } else {
                break;
            }
        }
        Token::new(keyword_match(&word), word, self.line)
    }
}

/// Tokenizes the entire source before parsing starts, failing fast on the
/// first lexical error.
#[derive(Debug)]
pub struct EagerScanner {
    tokens: Vec<Token>,
    current: usize,
}

impl EagerScanner {
    pub fn new(source: &str) -> Result<Self> {
        let mut cursor = Cursor::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = cursor.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(EagerScanner { tokens, current: 0 })
    }
}

impl Scanner for EagerScanner {
    fn current(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn advance(&mut self) -> Result<Token> {
        if !self.is_at_end() {
            self.current += 1;
        }
        Ok(self.previous().clone())
    }
}

/// Produces each token on demand, holding only the current/previous pair.
pub struct LazyScanner<'a> {
    cursor: Cursor<'a>,
    current: Token,
    previous: Token,
}

impl<'a> LazyScanner<'a> {
    pub fn new(source: &'a str) -> Result<Self> {
        let mut cursor = Cursor::new(source);
        let current = cursor.next_token()?;
        Ok(LazyScanner {
            cursor,
            current,
            previous: Token::eof(0),
        })
    }
}

impl Scanner for LazyScanner<'_> {
    fn current(&self) -> &Token {
        &self.current
    }

    fn previous(&self) -> &Token {
        &self.previous
    }

    fn advance(&mut self) -> Result<Token> {
        if !self.is_at_end() {
            let next = self.cursor.next_token()?;
            self.previous = mem::replace(&mut self.current, next);
        }
        Ok(self.previous.clone())
    }
}
