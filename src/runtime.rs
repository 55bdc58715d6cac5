//! Embedded scripting runtime.
//!
//! A [`Runtime`] owns the `__main__` namespace, the table of built-in modules
//! and the writer that `print` targets. It is created with
//! [`Runtime::initialize`], runs any number of source strings through
//! [`Runtime::run_simple_string`], and is torn down by [`Runtime::finalize`].
//! Names bound by one source string stay visible to the next.
use std::io::Write;
use std::rc::Rc;

use anyhow::{Context, Result, ensure};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::ast::Program;
use crate::parser;

pub mod builtins;
pub mod error;
mod execution;
pub mod module;
pub mod value;

use error::RuntimeError;
use execution::{Environment, ExecResult, Executor, Namespace};
use module::Module;
use value::Value;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;
/// Largest `max_call_depth` accepted; deeper recursion would exhaust the
/// native stack of the thread running the boot sequence.
pub const MAX_SUPPORTED_CALL_DEPTH: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Exposed to scripts as `sys.executable`.
    pub program_name: String,
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program_name: "nyx".to_string(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub scripts_executed: usize,
    pub scripts_failed: usize,
    pub statements_executed: u64,
}

/// What is left of a runtime after [`Runtime::finalize`].
#[derive(Debug)]
pub struct Finalized<W> {
    pub output: W,
    pub stats: RuntimeStats,
}

pub struct Runtime<W: Write> {
    config: RuntimeConfig,
    globals: Namespace,
    modules: FxHashMap<String, Rc<Module>>,
    // `None` once finalized.
    output: Option<W>,
    stats: RuntimeStats,
}

impl<W: Write> Runtime<W> {
    pub fn initialize(config: RuntimeConfig, output: W) -> Result<Self> {
        ensure!(
            config.max_call_depth > 0,
            "max_call_depth must be at least 1"
        );
        ensure!(
            config.max_call_depth <= MAX_SUPPORTED_CALL_DEPTH,
            "max_call_depth {} exceeds the supported maximum of {MAX_SUPPORTED_CALL_DEPTH}",
            config.max_call_depth
        );
        let modules = module::builtin_modules(&config);
        debug!(
            program = %config.program_name,
            modules = modules.len(),
            "embedded runtime initialized"
        );
        Ok(Self {
            config,
            globals: Namespace::default(),
            modules,
            output: Some(output),
            stats: RuntimeStats::default(),
        })
    }

    /// Parses and executes `source` in the persistent global namespace.
    ///
    /// Nothing runs when the source fails to tokenize, parse or validate.
    pub fn run_simple_string(&mut self, source: &str) -> Result<()> {
        trace!(bytes = source.len(), "running source string");
        let result = parser::parse(source)
            .context("Compiling source string")
            .and_then(|program| Ok(self.run_program(&program)?));
        if result.is_ok() {
            self.stats.scripts_executed += 1;
        } else {
            self.stats.scripts_failed += 1;
        }
        result
    }

    /// Executes an already parsed program at module level.
    pub fn run_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        execution::validate(&program.statements, false)?;

        let output = self.output.as_mut().ok_or_else(|| RuntimeError::Output {
            message: "runtime already finalized".to_string(),
        })?;
        let mut executor = Executor {
            output,
            modules: &self.modules,
            max_call_depth: self.config.max_call_depth,
            depth: 0,
            max_evaluation_depth: execution::MAX_EVALUATION_DEPTH,
            evaluation_depth: 0,
            statements_executed: 0,
        };
        let mut environment = Environment::top_level(&mut self.globals);
        let result = executor.exec_block(&program.statements, &mut environment);
        self.stats.statements_executed += executor.statements_executed;

        match result? {
            ExecResult::Continue => Ok(()),
            ExecResult::Return(_) => Err(RuntimeError::ReturnOutsideFunction),
        }
    }

    /// Looks up a name in the global namespace.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    /// Flushes the output, drops every global and module, and hands the
    /// writer back.
    pub fn finalize(mut self) -> Result<Finalized<W>> {
        self.release();
        let mut output = self
            .output
            .take()
            .context("Embedded runtime finalized twice")?;
        output.flush().context("Flushing runtime output")?;
        debug!(stats = ?self.stats, "embedded runtime finalized");
        Ok(Finalized {
            output,
            stats: self.stats,
        })
    }

    fn release(&mut self) {
        self.globals.clear();
        self.modules.clear();
    }
}

impl<W: Write> Drop for Runtime<W> {
    fn drop(&mut self) {
        if let Some(mut output) = self.output.take() {
            self.release();
            let _ = output.flush();
            debug!("embedded runtime dropped without finalize");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn runtime() -> Runtime<Vec<u8>> {
        Runtime::initialize(RuntimeConfig::default(), Vec::new()).expect("initialize")
    }

    fn output(runtime: Runtime<Vec<u8>>) -> String {
        let finalized = runtime.finalize().expect("finalize");
        String::from_utf8(finalized.output).expect("utf-8 output")
    }

    fn run(source: &str) -> String {
        let mut runtime = runtime();
        runtime.run_simple_string(source).expect("run failed");
        output(runtime)
    }

    fn run_error(source: &str) -> RuntimeError {
        let mut runtime = runtime();
        runtime
            .run_simple_string(source)
            .expect_err("expected runtime failure")
            .downcast::<RuntimeError>()
            .expect("expected RuntimeError")
    }

    #[test]
    fn runs_the_boot_statements() {
        let mut runtime = runtime();
        runtime
            .run_simple_string("print('Hello from Embedded Python')")
            .expect("first statement");
        runtime
            .run_simple_string("import sys\nprint(sys.version)")
            .expect("second statement");
        assert_eq!(
            output(runtime),
            format!("Hello from Embedded Python\n{}\n", module::runtime_version())
        );
    }

    #[test]
    fn globals_persist_between_source_strings() {
        let mut runtime = runtime();
        runtime.run_simple_string("import sys as s\nn = 40").expect("define");
        runtime
            .run_simple_string("print(n + 2, s.platform)")
            .expect("use");
        assert!(matches!(runtime.global("n"), Some(Value::Integer(40))));
        assert_eq!(output(runtime), "42 nyx\n");
    }

    #[test]
    fn evaluates_control_flow_and_functions() {
        let source = indoc! {"
            def countdown(n):
                while 0 < n:
                    if n == 2:
                        print('two')
                    elif n != 3:
                        print(n)
                    else:
                        pass
                    n = n - 1
                return 'done'

            print(countdown(4))
        "};
        assert_eq!(run(source), "4\ntwo\n1\ndone\n");
    }

    #[test]
    fn returns_from_function_without_executing_remaining_body() {
        let source = indoc! {"
            def f():
                return 7
                print('unreachable')
            print(f(), f() - 10, -f())
        "};
        assert_eq!(run(source), "7 -3 -7\n");
    }

    #[test]
    fn builtins_len_and_str() {
        assert_eq!(
            run("print(len('nyx'), str(12) + '!', str(None), len(''))"),
            "3 12! None 0\n"
        );
        assert_eq!(run("print()\nprint(print)"), "\n<built-in function print>\n");
    }

    #[test]
    fn function_locals_do_not_leak_into_globals() {
        let source = indoc! {"
            def f():
                x = 42
            f()
            print(x)
        "};
        assert_eq!(
            run_error(source),
            RuntimeError::UndefinedVariable {
                name: "x".to_string()
            }
        );
    }

    #[test]
    fn local_names_shadow_builtins() {
        let source = indoc! {"
            def f(len):
                return len + 1
            print(f(1))
        "};
        assert_eq!(run(source), "2\n");
    }

    #[test]
    fn invalid_programs_do_not_run_at_all() {
        let mut runtime = runtime();
        let error = runtime
            .run_simple_string("print('before')\nreturn 1")
            .expect_err("return outside function");
        assert_eq!(
            error.downcast::<RuntimeError>().expect("RuntimeError"),
            RuntimeError::ReturnOutsideFunction
        );

        let error = runtime
            .run_simple_string("def f():\n    def g():\n        pass\n")
            .expect_err("nested def");
        assert_eq!(
            error.downcast::<RuntimeError>().expect("RuntimeError"),
            RuntimeError::NestedFunctionDefinitionsUnsupported
        );

        let error = runtime
            .run_simple_string("print('before')\nprint(")
            .expect_err("syntax error");
        assert!(error.to_string().contains("Compiling source string"));

        assert_eq!(runtime.stats().scripts_failed, 3);
        assert_eq!(output(runtime), "");
    }

    #[test]
    fn reports_import_and_attribute_errors() {
        assert_eq!(
            run_error("import os"),
            RuntimeError::ModuleNotFound {
                name: "os".to_string()
            }
        );
        assert_eq!(
            run_error("import sys\nprint(sys.path)"),
            RuntimeError::UnknownAttribute {
                attribute: "path".to_string(),
                type_name: "module".to_string()
            }
        );
        assert_eq!(
            run_error("x = 'a'.upper"),
            RuntimeError::UnknownAttribute {
                attribute: "upper".to_string(),
                type_name: "str".to_string()
            }
        );
    }

    #[test]
    fn reports_call_errors() {
        assert_eq!(
            run_error("1()"),
            RuntimeError::ObjectNotCallable {
                type_name: "int".to_string()
            }
        );
        assert_eq!(
            run_error("def f(a):\n    pass\nf()"),
            RuntimeError::FunctionArityMismatch {
                name: "f".to_string(),
                expected: 1,
                found: 0
            }
        );
        assert_eq!(
            run_error("len(1)"),
            RuntimeError::InvalidArgumentType {
                function: "len".to_string(),
                expected: "str",
                got: "int".to_string()
            }
        );
        assert_eq!(
            run_error("missing()"),
            RuntimeError::UndefinedVariable {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn enforces_call_depth_limit() {
        let config = RuntimeConfig {
            max_call_depth: 10,
            ..RuntimeConfig::default()
        };
        let mut runtime = Runtime::initialize(config, Vec::new()).expect("initialize");
        let source = indoc! {"
            def down(n):
                if n == 0:
                    return 0
                return down(n - 1)
        "};
        runtime.run_simple_string(source).expect("define");
        runtime
            .run_simple_string("print(down(9))")
            .expect("within limit");
        let error = runtime
            .run_simple_string("down(10)")
            .expect_err("beyond limit");
        assert_eq!(
            error.downcast::<RuntimeError>().expect("RuntimeError"),
            RuntimeError::RecursionLimit { limit: 10 }
        );
        assert_eq!(output(runtime), "0\n");
    }

    #[test]
    fn rejects_zero_call_depth() {
        let config = RuntimeConfig {
            max_call_depth: 0,
            ..RuntimeConfig::default()
        };
        assert!(Runtime::initialize(config, Vec::new()).is_err());
    }

    #[test]
    fn rejects_call_depth_beyond_supported_maximum() {
        let config = RuntimeConfig {
            max_call_depth: 100_000,
            ..RuntimeConfig::default()
        };
        let error = Runtime::initialize(config, Vec::new())
            .err()
            .expect("oversized call depth must be rejected");
        assert!(
            error.to_string().contains("exceeds the supported maximum"),
            "{error}"
        );

        let config = RuntimeConfig {
            max_call_depth: MAX_SUPPORTED_CALL_DEPTH,
            ..RuntimeConfig::default()
        };
        assert!(Runtime::initialize(config, Vec::new()).is_ok());
    }

    #[test]
    fn deep_evaluation_across_calls_fails_cleanly() {
        // Each call nests 150 negations, so the evaluation limit trips long
        // before the call depth limit does.
        let source = format!(
            "def f(n):\n    if n == 0:\n        return 0\n    return {}f(n - 1)\nprint(f(100))\n",
            "-".repeat(150)
        );
        let error = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || run_error(&source))
            .expect("spawn evaluator thread")
            .join()
            .expect("evaluator thread");
        assert_eq!(
            error,
            RuntimeError::EvaluationDepthLimit {
                limit: execution::MAX_EVALUATION_DEPTH
            }
        );
    }

    #[test]
    fn chained_comparisons_short_circuit() {
        let source = indoc! {"
            def noisy(n):
                print('eval', n)
                return n
            print(1 < 2 < 3, 3 < 2 < 1, 1 == 1 != 2)
            print(noisy(2) < noisy(1) < noisy(3))
        "};
        assert_eq!(run(source), "True False True\neval 2\neval 1\nFalse\n");
    }

    #[test]
    fn reading_a_local_before_assignment_is_an_error() {
        let source = indoc! {"
            total = 10
            def bump():
                print(total)
                total = 1
            bump()
        "};
        assert_eq!(
            run_error(source),
            RuntimeError::UnboundLocalVariable {
                name: "total".to_string()
            }
        );

        let source = indoc! {"
            count = 3
            def read_only():
                return count + 1
            print(read_only())
        "};
        assert_eq!(run(source), "4\n");
    }

    #[test]
    fn finalize_reports_stats() {
        let mut runtime = runtime();
        runtime.run_simple_string("a = 1\nb = 2").expect("run");
        let _ = runtime.run_simple_string("c = d");
        let finalized = runtime.finalize().expect("finalize");
        assert_eq!(
            finalized.stats,
            RuntimeStats {
                scripts_executed: 1,
                scripts_failed: 1,
                statements_executed: 3,
            }
        );
    }

    #[test]
    fn sys_exposes_configured_program_name() {
        let config = RuntimeConfig {
            program_name: "/sbin/nyx".to_string(),
            ..RuntimeConfig::default()
        };
        let mut runtime = Runtime::initialize(config, Vec::new()).expect("initialize");
        runtime
            .run_simple_string("import sys\nprint(sys.executable, sys)")
            .expect("run");
        assert_eq!(output(runtime), "/sbin/nyx <module 'sys' (built-in)>\n");
    }
}
