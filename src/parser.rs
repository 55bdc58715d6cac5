use anyhow::Result;
use thiserror::Error;

use crate::ast::{BinaryOperator, Expression, Program, Statement};
use crate::lexer::{tokenize, unescape};
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }
}

/// Deepest nesting of parentheses, unary operators, operator chains and blocks
/// accepted in one source text.
pub const MAX_NESTING_DEPTH: usize = 200;

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    position: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::EOF) {
            if self.consume_newlines() {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current() {
            TokenKind::Def => self.parse_function_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_statement_end()?;
                Ok(Statement::Return(value))
            }
            TokenKind::Pass => {
                self.advance();
                self.expect_statement_end()?;
                Ok(Statement::Pass)
            }
            TokenKind::Identifier(_) if matches!(self.peek(), TokenKind::Equal) => {
                self.parse_assignment()
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect_statement_end()?;
                Ok(Statement::Expr(expr))
            }
        }
    }

    fn parse_function_def(&mut self) -> Result<Statement, ParseError> {
        self.expect(TokenKind::Def, "def")?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen, "(")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let param = self.expect_identifier()?;
            if params.contains(&param) {
                return Err(self.error_here(format!(
                    "Duplicate argument '{param}' in function definition"
                )));
            }
            params.push(param);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        let body = self.parse_block()?;
        Ok(Statement::FunctionDef { name, params, body })
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        // Called on either `if` or `elif`; both open the same shape.
        self.advance();
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let else_body = match self.current() {
            TokenKind::Elif => {
                self.descend()?;
                let nested = self.parse_if()?;
                self.depth -= 1;
                vec![nested]
            }
            TokenKind::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        self.expect(TokenKind::While, "while")?;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_import(&mut self) -> Result<Statement, ParseError> {
        self.expect(TokenKind::Import, "import")?;
        let module = self.expect_identifier()?;
        let alias = if self.eat(&TokenKind::As) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.expect_statement_end()?;
        Ok(Statement::Import { module, alias })
    }

    fn parse_assignment(&mut self) -> Result<Statement, ParseError> {
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Equal, "=")?;
        let value = self.parse_expression()?;
        self.expect_statement_end()?;
        Ok(Statement::Assign { name, value })
    }

    /// `: NEWLINE INDENT statement+ DEDENT`
    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.descend()?;
        self.expect(TokenKind::Colon, ":")?;
        self.expect(TokenKind::Newline, "newline")?;
        self.consume_newlines();
        self.expect(TokenKind::Indent, "indent")?;

        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::EOF) {
            if self.consume_newlines() {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        self.expect(TokenKind::Dedent, "dedent")?;
        self.depth -= 1;
        Ok(body)
    }

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_additive()?;
        let mut comparisons = Vec::new();
        while let Some(op) = self.comparison_operator() {
            self.advance();
            comparisons.push((op, self.parse_additive()?));
        }
        if comparisons.len() > 1 {
            return Ok(Expression::Compare {
                left: Box::new(left),
                comparisons,
            });
        }
        Ok(match comparisons.pop() {
            Some((op, right)) => Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            None => left,
        })
    }

    fn comparison_operator(&self) -> Option<BinaryOperator> {
        match self.current() {
            TokenKind::Less => Some(BinaryOperator::LessThan),
            TokenKind::EqualEqual => Some(BinaryOperator::Equal),
            TokenKind::NotEqual => Some(BinaryOperator::NotEqual),
            _ => None,
        }
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let depth = self.depth;
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            // Each link nests the tree built so far one level deeper.
            self.descend()?;
            self.advance();
            let right = self.parse_unary()?;
            expr = Expression::BinaryOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.check(&TokenKind::Minus) {
            self.descend()?;
            self.advance();
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expression::Negate(Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&TokenKind::LParen) {
                self.descend()?;
                self.advance();
                let args = self.parse_arguments()?;
                expr = Expression::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.check(&TokenKind::Dot) {
                self.descend()?;
                self.advance();
                let name = self.expect_identifier()?;
                expr = Expression::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let expr = match *self.current() {
            TokenKind::Integer(value) => Expression::Integer(value),
            TokenKind::String(raw) => {
                let mut value = unescape(raw);
                self.advance();
                // Adjacent literals concatenate, as in `'a' 'b'`.
                while let TokenKind::String(raw) = *self.current() {
                    value.push_str(&unescape(raw));
                    self.advance();
                }
                return Ok(Expression::String(value));
            }
            TokenKind::Identifier(name) => Expression::Identifier(name.to_string()),
            TokenKind::True => Expression::Boolean(true),
            TokenKind::False => Expression::Boolean(false),
            TokenKind::None => Expression::None,
            TokenKind::LParen => {
                self.descend()?;
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, ")")?;
                self.depth -= 1;
                return Ok(expr);
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(expr)
    }

    /// Enters one nesting level. Callers restore `depth` once the construct is
    /// parsed; on error the whole parse is abandoned.
    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here(format!(
                "Too many nested expressions or blocks (limit {MAX_NESTING_DEPTH})"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn consume_newlines(&mut self) -> bool {
        let mut consumed = false;
        while self.eat(&TokenKind::Newline) {
            consumed = true;
        }
        consumed
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current(),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::EOF
        )
    }

    /// A simple statement ends at a newline, or right before a dedent/EOF when
    /// the source has no trailing newline.
    fn expect_statement_end(&mut self) -> Result<(), ParseError> {
        if self.eat(&TokenKind::Newline) || self.at_statement_end() {
            Ok(())
        } else {
            Err(self.unexpected("newline"))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = *self.current() {
            self.advance();
            Ok(name.to_string())
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn expect(&mut self, kind: TokenKind<'a>, label: &str) -> Result<(), ParseError> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(label))
        }
    }

    fn eat(&mut self, kind: &TokenKind<'a>) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind<'a>) -> bool {
        self.current() == kind
    }

    fn current(&self) -> &TokenKind<'a> {
        self.kind_at(self.position)
    }

    fn peek(&self) -> &TokenKind<'a> {
        self.kind_at(self.position + 1)
    }

    fn kind_at(&self, index: usize) -> &TokenKind<'a> {
        self.tokens
            .get(index)
            .map(|token| &token.kind)
            .unwrap_or(&TokenKind::EOF)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(Token::span)
            .unwrap_or_default()
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error_here(format!("Expected {expected}, got {:?}", self.current()))
    }

    fn error_here(&self, message: String) -> ParseError {
        ParseError::new(message, self.current_span())
    }
}

pub fn parse_tokens(tokens: Vec<Token<'_>>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

/// Tokenizes and parses a complete source text.
pub fn parse(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    Ok(parse_tokens(tokens)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn identifier(name: &str) -> Expression {
        Expression::Identifier(name.to_string())
    }

    fn call(callee: Expression, args: Vec<Expression>) -> Expression {
        Expression::Call {
            callee: Box::new(callee),
            args,
        }
    }

    fn parse_error(source: &str) -> ParseError {
        let tokens = tokenize(source).expect("tokenize should succeed");
        parse_tokens(tokens).expect_err("expected parse failure")
    }

    #[test]
    fn parses_simple_program() {
        let input = indoc! {"
            def fn(a, b):
                n = a + b
                print(n)
            fn(4, 4)
        "};
        let program = parse(input).expect("parse failed");

        let expected = Program {
            statements: vec![
                Statement::FunctionDef {
                    name: "fn".to_string(),
                    params: vec!["a".to_string(), "b".to_string()],
                    body: vec![
                        Statement::Assign {
                            name: "n".to_string(),
                            value: Expression::BinaryOp {
                                left: Box::new(identifier("a")),
                                op: BinaryOperator::Add,
                                right: Box::new(identifier("b")),
                            },
                        },
                        Statement::Expr(call(identifier("print"), vec![identifier("n")])),
                    ],
                },
                Statement::Expr(call(
                    identifier("fn"),
                    vec![Expression::Integer(4), Expression::Integer(4)],
                )),
            ],
        };

        assert_eq!(program, expected);
    }

    #[test]
    fn parses_boot_statements() {
        let hello = parse("print('Hello from Embedded Python')").expect("parse failed");
        assert_eq!(
            hello.statements,
            vec![Statement::Expr(call(
                identifier("print"),
                vec![Expression::String("Hello from Embedded Python".to_string())],
            ))]
        );

        let version = parse("import sys\nprint(sys.version)").expect("parse failed");
        assert_eq!(
            version.statements,
            vec![
                Statement::Import {
                    module: "sys".to_string(),
                    alias: None,
                },
                Statement::Expr(call(
                    identifier("print"),
                    vec![Expression::Attribute {
                        object: Box::new(identifier("sys")),
                        name: "version".to_string(),
                    }],
                )),
            ]
        );
    }

    #[test]
    fn parses_elif_chain_as_nested_if() {
        let input = indoc! {"
            if a:
                pass
            elif b:
                pass
            else:
                return
        "};
        let program = parse(input).expect("parse failed");
        assert_eq!(
            program.statements,
            vec![Statement::If {
                condition: identifier("a"),
                then_body: vec![Statement::Pass],
                else_body: vec![Statement::If {
                    condition: identifier("b"),
                    then_body: vec![Statement::Pass],
                    else_body: vec![Statement::Return(None)],
                }],
            }]
        );
    }

    #[test]
    fn binds_comparison_looser_than_arithmetic() {
        let program = parse("x = -a + 1 < b").expect("parse failed");
        assert_eq!(
            program.statements,
            vec![Statement::Assign {
                name: "x".to_string(),
                value: Expression::BinaryOp {
                    left: Box::new(Expression::BinaryOp {
                        left: Box::new(Expression::Negate(Box::new(identifier("a")))),
                        op: BinaryOperator::Add,
                        right: Box::new(Expression::Integer(1)),
                    }),
                    op: BinaryOperator::LessThan,
                    right: Box::new(identifier("b")),
                },
            }]
        );
    }

    #[test]
    fn parses_import_alias_and_adjacent_strings() {
        let program = parse("import sys as system\ns = 'a' \"b\\n\"\n").expect("parse failed");
        assert_eq!(
            program.statements,
            vec![
                Statement::Import {
                    module: "sys".to_string(),
                    alias: Some("system".to_string()),
                },
                Statement::Assign {
                    name: "s".to_string(),
                    value: Expression::String("ab\n".to_string()),
                },
            ]
        );
    }

    #[test]
    fn block_without_trailing_newline_closes_at_eof() {
        let program = parse("while x:\n    x = x - 1").expect("parse failed");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn reports_position_of_unexpected_token() {
        let error = parse_error("print(1\n");
        assert_eq!(error.line, 2);
        assert!(error.message.starts_with("Expected )"), "{}", error.message);

        let error = parse_error("x = = 1\n");
        assert_eq!(
            error.to_string(),
            "Expected expression, got Equal at line 1, column 4"
        );
    }

    #[test]
    fn rejects_missing_block_and_duplicate_parameters() {
        let error = parse_error("if x:\npass\n");
        assert!(error.message.starts_with("Expected indent"), "{}", error.message);

        let error = parse_error("def f(a, a):\n    pass\n");
        assert!(error.message.contains("Duplicate argument 'a'"));
    }

    #[test]
    fn parses_chained_comparison() {
        let program = parse("x = a < b == c").expect("parse failed");
        assert_eq!(
            program.statements,
            vec![Statement::Assign {
                name: "x".to_string(),
                value: Expression::Compare {
                    left: Box::new(identifier("a")),
                    comparisons: vec![
                        (BinaryOperator::LessThan, identifier("b")),
                        (BinaryOperator::Equal, identifier("c")),
                    ],
                },
            }]
        );
    }

    #[test]
    fn accepts_moderate_nesting() {
        let source = format!("x = {}1{}\n", "(".repeat(150), ")".repeat(150));
        assert!(parse(&source).is_ok());

        let source = format!("x = {}1\n", "-".repeat(150));
        assert!(parse(&source).is_ok());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let deep_parens = format!("print({}1{})\n", "(".repeat(200_000), ")".repeat(200_000));
        let deep_negation = format!("x = {}1\n", "-".repeat(3_000));
        let long_chain = format!("x = 1{}\n", " + 1".repeat(5_000));
        let long_postfix = format!("x = f{}\n", "()".repeat(5_000));

        for source in [deep_parens, deep_negation, long_chain, long_postfix] {
            let error = parse_error(&source);
            assert!(
                error.message.starts_with("Too many nested expressions or blocks"),
                "{}",
                error.message
            );
            assert_eq!(error.line, 1);
        }

        let mut nested_blocks = String::new();
        for level in 0..250 {
            nested_blocks.push_str(&" ".repeat(level));
            nested_blocks.push_str("if x:\n");
        }
        nested_blocks.push_str(&" ".repeat(250));
        nested_blocks.push_str("pass\n");
        let error = parse_error(&nested_blocks);
        assert!(error.message.starts_with("Too many nested"), "{}", error.message);
    }
}
