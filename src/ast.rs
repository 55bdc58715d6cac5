#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Integer(i64),
    Identifier(String),
    Boolean(bool),
    String(String),
    None,
    Negate(Box<Expression>),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    /// Chained comparison such as `a < b == c`; single comparisons stay `BinaryOp`.
    Compare {
        left: Box<Expression>,
        comparisons: Vec<(BinaryOperator, Expression)>,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    Attribute {
        object: Box<Expression>,
        name: String,
    },
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Sub,
    LessThan,
    Equal,
    NotEqual,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::LessThan => "<",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Vec<Statement>,
    },
    Assign {
        name: String,
        value: Expression,
    },
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    /// `import module [as alias]`
    Import {
        module: String,
        alias: Option<String>,
    },
    Return(Option<Expression>),
    Pass,
    Expr(Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Program {
    pub statements: Vec<Statement>,
}
