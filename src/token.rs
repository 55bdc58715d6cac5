#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind<'a> {
    Identifier(&'a str),
    Integer(i64),
    /// Raw literal body between the quotes; escapes are still encoded.
    String(&'a str),
    True,
    False,
    None,

    // Keywords
    If,
    Elif,
    Else,
    While,
    Def,
    Return,
    Pass,
    Import,
    As,

    // Operators
    Equal,      // =
    EqualEqual, // ==
    NotEqual,   // !=
    Plus,       // +
    Minus,      // -
    Less,       // <

    // Delimiters
    Colon,  // :
    Comma,  // ,
    Dot,    // .
    LParen, // (
    RParen, // )

    // Structural
    Newline,
    Indent,
    Dedent,
    EOF,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn kind(&self) -> &TokenKind<'a> {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }
}
