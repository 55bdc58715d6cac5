use thiserror::Error;

/// Typed failures raised while executing a script in the embedded runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("cannot access local variable '{name}' where it is not associated with a value")]
    UnboundLocalVariable { name: String },
    #[error("No module named '{name}'")]
    ModuleNotFound { name: String },
    #[error("Unknown attribute '{attribute}' for type {type_name}")]
    UnknownAttribute {
        attribute: String,
        type_name: String,
    },
    #[error("Object of type {type_name} is not callable")]
    ObjectNotCallable { type_name: String },
    #[error("Function '{name}' expected {expected} arguments, got {found}")]
    FunctionArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Unsupported operand types for {op}: '{left}' and '{right}'")]
    UnsupportedOperands {
        op: &'static str,
        left: String,
        right: String,
    },
    #[error("Bad operand type for unary -: '{type_name}'")]
    UnsupportedUnaryOperand { type_name: String },
    #[error("Integer overflow in '{op}'")]
    IntegerOverflow { op: &'static str },
    #[error("Invalid argument type for '{function}': expected {expected}, got {got}")]
    InvalidArgumentType {
        function: String,
        expected: &'static str,
        got: String,
    },
    #[error("Maximum recursion depth exceeded (limit {limit})")]
    RecursionLimit { limit: usize },
    #[error("Maximum recursion depth exceeded while evaluating nested expressions (limit {limit})")]
    EvaluationDepthLimit { limit: usize },
    #[error("Nested function definitions are not supported")]
    NestedFunctionDefinitionsUnsupported,
    #[error("Return outside of function")]
    ReturnOutsideFunction,
    #[error("Failed to write output: {message}")]
    Output { message: String },
}

impl RuntimeError {
    pub(crate) fn expect_function_arity(
        name: &str,
        expected: usize,
        found: usize,
    ) -> Result<(), RuntimeError> {
        if expected == found {
            Ok(())
        } else {
            Err(RuntimeError::FunctionArityMismatch {
                name: name.to_string(),
                expected,
                found,
            })
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        RuntimeError::Output {
            message: error.to_string(),
        }
    }
}
