use std::{iter::Peekable, str::CharIndices};

use anyhow::{Result, anyhow, bail};

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    indent_stack: Vec<usize>,
    pending_tokens: Vec<Token<'a>>,
    at_line_start: bool,
    eof_reached: bool,
    paren_depth: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            indent_stack: vec![0],
            pending_tokens: Vec::new(),
            at_line_start: true,
            eof_reached: false,
            paren_depth: 0,
            line: 1,
            column: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token<'a>> {
        if let Some(token) = self.pending_tokens.pop() {
            return Ok(token);
        }

        if self.eof_reached {
            return Ok(Token::new(TokenKind::EOF, self.empty_span()));
        }

        if self.at_line_start {
            self.at_line_start = false;
            if let Some(token) = self.handle_indentation()? {
                return Ok(token);
            }
        }

        self.skip_trivia();

        let Some(&(start_idx, ch)) = self.chars.peek() else {
            return Ok(self.finish());
        };

        let start_line = self.line;
        let start_column = self.column;
        let single = |lexer: &mut Self, kind: TokenKind<'a>| {
            lexer.advance_char();
            Token::new(
                kind,
                Span {
                    start: start_idx,
                    end: start_idx + 1,
                    line: start_line,
                    column: start_column,
                },
            )
        };

        match ch {
            '\n' => {
                let token = single(self, TokenKind::Newline);
                self.at_line_start = true;
                Ok(token)
            }
            '=' | '!' => self.read_operator(ch, start_idx, start_line, start_column),
            '+' => Ok(single(self, TokenKind::Plus)),
            '-' => Ok(single(self, TokenKind::Minus)),
            '<' => Ok(single(self, TokenKind::Less)),
            ':' => Ok(single(self, TokenKind::Colon)),
            ',' => Ok(single(self, TokenKind::Comma)),
            '.' => Ok(single(self, TokenKind::Dot)),
            '(' => {
                self.paren_depth += 1;
                Ok(single(self, TokenKind::LParen))
            }
            ')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Ok(single(self, TokenKind::RParen))
            }
            '"' | '\'' => self.read_string(ch, start_idx, start_line, start_column),
            c if c.is_alphabetic() || c == '_' => {
                Ok(self.read_identifier(start_idx, start_line, start_column))
            }
            c if c.is_ascii_digit() => self.read_integer(start_idx, start_line, start_column),
            _ => Err(anyhow!(
                "Unexpected character '{}' at line {}, column {}",
                ch,
                start_line,
                start_column
            )),
        }
    }

    /// Emits the Indent/Dedent tokens owed at the start of a logical line.
    fn handle_indentation(&mut self) -> Result<Option<Token<'a>>> {
        let indent_level = self.count_indentation()?;
        let current_indent = self.current_indent();
        let span = self.empty_span();

        if indent_level > current_indent {
            self.indent_stack.push(indent_level);
            return Ok(Some(Token::new(TokenKind::Indent, span)));
        }

        if indent_level < current_indent {
            while self.current_indent() > indent_level {
                self.indent_stack.pop();
                self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
            }
            if self.current_indent() != indent_level {
                bail!(
                    "Invalid dedent to {} spaces at line {}, column {}",
                    indent_level,
                    self.line,
                    self.column
                );
            }
            return Ok(self.pending_tokens.pop());
        }

        Ok(None)
    }

    fn count_indentation(&mut self) -> Result<usize> {
        // Look ahead so blank and comment-only lines never change indentation.
        let mut lookahead = self.chars.clone();
        while let Some(&(_, c)) = lookahead.peek() {
            match c {
                ' ' | '\r' => {
                    lookahead.next();
                }
                '\t' => bail!(
                    "Tabs are not supported for indentation at line {}, column {}",
                    self.line,
                    self.column
                ),
                '\n' | '#' => return Ok(self.current_indent()),
                _ => break,
            }
        }
        if lookahead.peek().is_none() {
            return Ok(self.current_indent());
        }

        let mut count = 0;
        while let Some(&(_, ' ')) = self.chars.peek() {
            self.advance_char();
            count += 1;
        }
        Ok(count)
    }

    fn skip_trivia(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            match c {
                ' ' | '\r' => {
                    self.advance_char();
                }
                '\n' if self.paren_depth > 0 => {
                    self.advance_char();
                }
                '#' => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance_char();
                    }
                }
                _ => break,
            }
        }
    }

    /// Closes any open blocks at end of input, then yields EOF.
    fn finish(&mut self) -> Token<'a> {
        self.eof_reached = true;
        let span = self.empty_span();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
        }
        self.pending_tokens
            .pop()
            .unwrap_or_else(|| Token::new(TokenKind::EOF, span))
    }

    fn read_operator(
        &mut self,
        first: char,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<Token<'a>> {
        self.advance_char();
        let followed_by_equal = matches!(self.chars.peek(), Some(&(_, '=')));
        let (kind, len) = match (first, followed_by_equal) {
            ('=', true) => (TokenKind::EqualEqual, 2),
            ('=', false) => (TokenKind::Equal, 1),
            ('!', true) => (TokenKind::NotEqual, 2),
            _ => bail!("Unexpected character '{first}' at line {line}, column {column}"),
        };
        if len == 2 {
            self.advance_char();
        }
        Ok(Token::new(
            kind,
            Span {
                start,
                end: start + len,
                line,
                column,
            },
        ))
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token<'a> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = match ident {
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "pass" => TokenKind::Pass,
            "import" => TokenKind::Import,
            "as" => TokenKind::As,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            _ => TokenKind::Identifier(ident),
        };
        Token::new(
            kind,
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        )
    }

    fn read_integer(&mut self, start: usize, line: usize, column: usize) -> Result<Token<'a>> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let num_str = &self.input[start..end_idx];
        let num = num_str.parse::<i64>().map_err(|_| {
            anyhow!("Invalid integer literal '{num_str}' at line {line}, column {column}")
        })?;
        Ok(Token::new(
            TokenKind::Integer(num),
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        ))
    }

    fn read_string(
        &mut self,
        quote: char,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<Token<'a>> {
        self.advance_char();
        let content_start = start + quote.len_utf8();
        while let Some(&(idx, c)) = self.chars.peek() {
            if c == quote {
                self.advance_char();
                return Ok(Token::new(
                    TokenKind::String(&self.input[content_start..idx]),
                    Span {
                        start,
                        end: idx + 1,
                        line,
                        column,
                    },
                ));
            }
            if c == '\n' {
                break;
            }
            self.advance_char();
            if c == '\\' {
                match self.chars.peek() {
                    Some(&(_, '\n')) | None => break,
                    Some(_) => {
                        self.advance_char();
                    }
                }
            }
        }
        bail!("Unterminated string literal at line {line}, column {column}");
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_token())
    }
}

impl<'a> Lexer<'a> {
    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn empty_span(&mut self) -> Span {
        let index = self.current_index();
        Span {
            start: index,
            end: index,
            line: self.line,
            column: self.column,
        }
    }
}

pub fn tokenize<'a>(input: &'a str) -> Result<Vec<Token<'a>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

/// Decodes backslash escapes in a raw string literal body.
///
/// Unknown escapes keep their backslash, as Python does.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
