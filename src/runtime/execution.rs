use std::io::Write;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{BinaryOperator, Expression, Statement};

use super::builtins::BuiltinFunction;
use super::error::RuntimeError;
use super::module::Module;
use super::value::{Function, Value};

pub(super) type Namespace = FxHashMap<String, Value>;

/// Deepest expression evaluation nesting, counted across function calls.
pub(super) const MAX_EVALUATION_DEPTH: usize = 2_000;

/// Control-flow marker for statement execution.
pub(super) enum ExecResult {
    Continue,
    Return(Value),
}

/// Rejects programs that can never run, before any statement executes.
pub(super) fn validate(body: &[Statement], in_function: bool) -> Result<(), RuntimeError> {
    for statement in body {
        match statement {
            Statement::FunctionDef { body, .. } => {
                if in_function {
                    return Err(RuntimeError::NestedFunctionDefinitionsUnsupported);
                }
                validate(body, true)?;
            }
            Statement::Return(_) if !in_function => {
                return Err(RuntimeError::ReturnOutsideFunction);
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                validate(then_body, in_function)?;
                validate(else_body, in_function)?;
            }
            Statement::While { body, .. } => validate(body, in_function)?,
            _ => {}
        }
    }
    Ok(())
}

/// Names a function body binds: parameters, assignment targets and imports.
fn local_names(params: &[String], body: &[Statement]) -> FxHashSet<String> {
    fn collect(body: &[Statement], names: &mut FxHashSet<String>) {
        for statement in body {
            match statement {
                Statement::Assign { name, .. } => {
                    names.insert(name.clone());
                }
                Statement::Import { module, alias } => {
                    names.insert(alias.as_ref().unwrap_or(module).clone());
                }
                Statement::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    collect(then_body, names);
                    collect(else_body, names);
                }
                Statement::While { body, .. } => collect(body, names),
                _ => {}
            }
        }
    }

    let mut names: FxHashSet<String> = params.iter().cloned().collect();
    collect(body, &mut names);
    names
}

/// Scoped variable environment with shared globals and optional function locals.
pub(super) struct Environment<'a> {
    globals: &'a mut Namespace,
    locals: Option<&'a mut Namespace>,
    local_names: Option<&'a FxHashSet<String>>,
}

impl<'a> Environment<'a> {
    pub(super) fn top_level(globals: &'a mut Namespace) -> Self {
        Self {
            globals,
            locals: None,
            local_names: None,
        }
    }

    /// A name bound anywhere in the running function is local for the whole
    /// body, so reading it before assignment is an error rather than a
    /// fallback to the global.
    fn load(&self, name: &str) -> Result<Option<Value>, RuntimeError> {
        if let Some(value) = self.locals.as_deref().and_then(|locals| locals.get(name)) {
            return Ok(Some(value.clone()));
        }
        if self.local_names.is_some_and(|names| names.contains(name)) {
            return Err(RuntimeError::UnboundLocalVariable {
                name: name.to_string(),
            });
        }
        Ok(self.globals.get(name).cloned())
    }

    fn store(&mut self, name: String, value: Value) {
        if let Some(locals) = self.locals.as_deref_mut() {
            locals.insert(name, value);
        } else {
            self.globals.insert(name, value);
        }
    }

    fn child_with_locals<'b>(
        &'b mut self,
        locals: &'b mut Namespace,
        local_names: &'b FxHashSet<String>,
    ) -> Environment<'b> {
        Environment {
            globals: &mut *self.globals,
            locals: Some(locals),
            local_names: Some(local_names),
        }
    }
}

/// Tree-walking executor for one script run.
pub(super) struct Executor<'a> {
    pub(super) output: &'a mut dyn Write,
    pub(super) modules: &'a FxHashMap<String, Rc<Module>>,
    pub(super) max_call_depth: usize,
    pub(super) depth: usize,
    pub(super) max_evaluation_depth: usize,
    pub(super) evaluation_depth: usize,
    pub(super) statements_executed: u64,
}

impl Executor<'_> {
    pub(super) fn exec_block(
        &mut self,
        body: &[Statement],
        environment: &mut Environment<'_>,
    ) -> Result<ExecResult, RuntimeError> {
        for statement in body {
            if let ExecResult::Return(value) = self.exec_statement(statement, environment)? {
                return Ok(ExecResult::Return(value));
            }
        }
        Ok(ExecResult::Continue)
    }

    fn exec_statement(
        &mut self,
        statement: &Statement,
        environment: &mut Environment<'_>,
    ) -> Result<ExecResult, RuntimeError> {
        self.statements_executed += 1;
        match statement {
            Statement::FunctionDef { name, params, body } => {
                let function = Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                    local_names: local_names(params, body),
                };
                environment.store(name.clone(), Value::Function(Rc::new(function)));
                Ok(ExecResult::Continue)
            }
            Statement::Assign { name, value } => {
                let value = self.eval_expression(value, environment)?;
                environment.store(name.clone(), value);
                Ok(ExecResult::Continue)
            }
            Statement::Import { module, alias } => {
                let loaded = self
                    .modules
                    .get(module)
                    .ok_or_else(|| RuntimeError::ModuleNotFound {
                        name: module.clone(),
                    })?;
                let binding = alias.as_ref().unwrap_or(module).clone();
                environment.store(binding, Value::Module(loaded.clone()));
                Ok(ExecResult::Continue)
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.eval_expression(condition, environment)?;
                let body = if condition.is_truthy() {
                    then_body
                } else {
                    else_body
                };
                self.exec_block(body, environment)
            }
            Statement::While { condition, body } => {
                while self.eval_expression(condition, environment)?.is_truthy() {
                    if let ExecResult::Return(value) = self.exec_block(body, environment)? {
                        return Ok(ExecResult::Return(value));
                    }
                }
                Ok(ExecResult::Continue)
            }
            Statement::Return(value) => {
                let value = match value {
                    Some(value) => self.eval_expression(value, environment)?,
                    None => Value::None,
                };
                Ok(ExecResult::Return(value))
            }
            Statement::Pass => Ok(ExecResult::Continue),
            Statement::Expr(expr) => {
                self.eval_expression(expr, environment)?;
                Ok(ExecResult::Continue)
            }
        }
    }

    fn eval_expression(
        &mut self,
        expr: &Expression,
        environment: &mut Environment<'_>,
    ) -> Result<Value, RuntimeError> {
        if self.evaluation_depth >= self.max_evaluation_depth {
            return Err(RuntimeError::EvaluationDepthLimit {
                limit: self.max_evaluation_depth,
            });
        }
        self.evaluation_depth += 1;
        let result = self.eval_nested(expr, environment);
        self.evaluation_depth -= 1;
        result
    }

    fn eval_nested(
        &mut self,
        expr: &Expression,
        environment: &mut Environment<'_>,
    ) -> Result<Value, RuntimeError> {
        match expr {
            Expression::Integer(value) => Ok(Value::Integer(*value)),
            Expression::Boolean(value) => Ok(Value::Boolean(*value)),
            Expression::String(value) => Ok(Value::string(value.as_str())),
            Expression::None => Ok(Value::None),
            Expression::Identifier(name) => match environment.load(name)? {
                Some(value) => Ok(value),
                None => BuiltinFunction::from_name(name)
                    .map(Value::BuiltinFunction)
                    .ok_or_else(|| RuntimeError::UndefinedVariable { name: name.clone() }),
            },
            Expression::Negate(operand) => self.eval_expression(operand, environment)?.negate(),
            Expression::BinaryOp { left, op, right } => {
                let left = self.eval_expression(left, environment)?;
                let right = self.eval_expression(right, environment)?;
                apply_binary(&left, *op, &right)
            }
            Expression::Compare { left, comparisons } => {
                // Each operand is evaluated once; the chain stops at the first false link.
                let mut left = self.eval_expression(left, environment)?;
                let mut result = Value::Boolean(true);
                for (op, right) in comparisons {
                    let right = self.eval_expression(right, environment)?;
                    result = apply_binary(&left, *op, &right)?;
                    if !result.is_truthy() {
                        break;
                    }
                    left = right;
                }
                Ok(result)
            }
            Expression::Attribute { object, name } => {
                let object = self.eval_expression(object, environment)?;
                let attribute = match &object {
                    Value::Module(module) => module.get(name).cloned(),
                    _ => None,
                };
                attribute.ok_or_else(|| RuntimeError::UnknownAttribute {
                    attribute: name.clone(),
                    type_name: object.type_name().to_string(),
                })
            }
            Expression::Call { callee, args } => {
                let callee = self.eval_expression(callee, environment)?;
                let mut evaluated_args = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated_args.push(self.eval_expression(arg, environment)?);
                }
                self.call_value(callee, evaluated_args, environment)
            }
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        environment: &mut Environment<'_>,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::BuiltinFunction(builtin) => self.call_builtin(builtin, args),
            Value::Function(function) => {
                RuntimeError::expect_function_arity(
                    &function.name,
                    function.params.len(),
                    args.len(),
                )?;
                if self.depth >= self.max_call_depth {
                    return Err(RuntimeError::RecursionLimit {
                        limit: self.max_call_depth,
                    });
                }
                let mut local_scope: Namespace =
                    function.params.iter().cloned().zip(args).collect();
                let mut local_environment =
                    environment.child_with_locals(&mut local_scope, &function.local_names);

                self.depth += 1;
                let result = self.exec_block(&function.body, &mut local_environment);
                self.depth -= 1;

                match result? {
                    ExecResult::Continue => Ok(Value::None),
                    ExecResult::Return(value) => Ok(value),
                }
            }
            other => Err(RuntimeError::ObjectNotCallable {
                type_name: other.type_name().to_string(),
            }),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: BuiltinFunction,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match builtin {
            BuiltinFunction::Print => {
                let rendered = args.iter().map(Value::to_string).collect::<Vec<_>>();
                writeln!(self.output, "{}", rendered.join(" "))?;
                Ok(Value::None)
            }
            BuiltinFunction::Len => {
                RuntimeError::expect_function_arity(builtin.name(), 1, args.len())?;
                match &args[0] {
                    Value::String(value) => Ok(Value::Integer(value.chars().count() as i64)),
                    other => Err(RuntimeError::InvalidArgumentType {
                        function: builtin.name().to_string(),
                        expected: "str",
                        got: other.type_name().to_string(),
                    }),
                }
            }
            BuiltinFunction::Str => {
                RuntimeError::expect_function_arity(builtin.name(), 1, args.len())?;
                match &args[0] {
                    Value::String(_) => Ok(args[0].clone()),
                    other => Ok(Value::string(other.to_string())),
                }
            }
        }
    }
}

fn apply_binary(left: &Value, op: BinaryOperator, right: &Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOperator::Add => left.add(right),
        BinaryOperator::Sub => left.sub(right),
        BinaryOperator::LessThan => left.lt(right),
        BinaryOperator::Equal => Ok(Value::Boolean(left.equals(right))),
        BinaryOperator::NotEqual => Ok(Value::Boolean(!left.equals(right))),
    }
}
