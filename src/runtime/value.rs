use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::ast::Statement;

use super::builtins::BuiltinFunction;
use super::error::RuntimeError;
use super::module::Module;

/// A user-defined function captured by a `def` statement.
#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    /// Names bound anywhere in the body; these never resolve to globals.
    pub local_names: FxHashSet<String>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
    None,
    Function(Rc<Function>),
    BuiltinFunction(BuiltinFunction),
    Module(Rc<Module>),
}

impl Value {
    pub fn string(value: impl Into<Rc<str>>) -> Self {
        Value::String(value.into())
    }

    /// Integer view of the value; `bool` participates in arithmetic as 0/1.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            Value::Boolean(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Integer(value) => *value != 0,
            Value::Boolean(value) => *value,
            Value::String(value) => !value.is_empty(),
            Value::None => false,
            Value::Function(_) | Value::BuiltinFunction(_) | Value::Module(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "int",
            Value::Boolean(_) => "bool",
            Value::String(_) => "str",
            Value::None => "NoneType",
            Value::Function(_) => "function",
            Value::BuiltinFunction(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, RuntimeError> {
        if let (Value::String(left), Value::String(right)) = (self, other) {
            let mut joined = String::with_capacity(left.len() + right.len());
            joined.push_str(left);
            joined.push_str(right);
            return Ok(Value::string(joined));
        }
        self.int_op(other, "+", i64::checked_add)
    }

    pub fn sub(&self, other: &Value) -> Result<Value, RuntimeError> {
        self.int_op(other, "-", i64::checked_sub)
    }

    pub fn lt(&self, other: &Value) -> Result<Value, RuntimeError> {
        if let (Value::String(left), Value::String(right)) = (self, other) {
            return Ok(Value::Boolean(left < right));
        }
        match (self.as_int(), other.as_int()) {
            (Some(left), Some(right)) => Ok(Value::Boolean(left < right)),
            _ => Err(self.unsupported(other, "<")),
        }
    }

    pub fn negate(&self) -> Result<Value, RuntimeError> {
        let value = self
            .as_int()
            .ok_or_else(|| RuntimeError::UnsupportedUnaryOperand {
                type_name: self.type_name().to_string(),
            })?;
        value
            .checked_neg()
            .map(Value::Integer)
            .ok_or(RuntimeError::IntegerOverflow { op: "-" })
    }

    /// `==` semantics: numbers compare by value across int/bool, everything
    /// else by content or identity, and mismatched types are simply unequal.
    pub fn equals(&self, other: &Value) -> bool {
        if let (Some(left), Some(right)) = (self.as_int(), other.as_int()) {
            return left == right;
        }
        match (self, other) {
            (Value::String(left), Value::String(right)) => left == right,
            (Value::None, Value::None) => true,
            (Value::Function(left), Value::Function(right)) => Rc::ptr_eq(left, right),
            (Value::BuiltinFunction(left), Value::BuiltinFunction(right)) => left == right,
            (Value::Module(left), Value::Module(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }

    fn int_op(
        &self,
        other: &Value,
        op: &'static str,
        apply: fn(i64, i64) -> Option<i64>,
    ) -> Result<Value, RuntimeError> {
        match (self.as_int(), other.as_int()) {
            (Some(left), Some(right)) => apply(left, right)
                .map(Value::Integer)
                .ok_or(RuntimeError::IntegerOverflow { op }),
            _ => Err(self.unsupported(other, op)),
        }
    }

    fn unsupported(&self, other: &Value, op: &'static str) -> RuntimeError {
        RuntimeError::UnsupportedOperands {
            op,
            left: self.type_name().to_string(),
            right: other.type_name().to_string(),
        }
    }
}

/// Renders the value the way `print` and `str()` show it.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{value}"),
            Value::Boolean(true) => f.write_str("True"),
            Value::Boolean(false) => f.write_str("False"),
            Value::String(value) => f.write_str(value),
            Value::None => f.write_str("None"),
            Value::Function(function) => write!(f, "<function {}>", function.name),
            Value::BuiltinFunction(builtin) => {
                write!(f, "<built-in function {}>", builtin.name())
            }
            Value::Module(module) => write!(f, "<module '{}' (built-in)>", module.name()),
        }
    }
}
