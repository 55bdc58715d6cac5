use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::RuntimeConfig;
use super::value::Value;

/// Reported as `sys.platform`.
pub const PLATFORM: &str = "nyx";

/// The string exposed as `sys.version`.
pub fn runtime_version() -> String {
    format!(
        "{} (nyx embedded runtime) [rust]",
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Debug)]
pub struct Module {
    name: String,
    attributes: FxHashMap<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: FxHashMap::default(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }
}

fn sys_module(config: &RuntimeConfig) -> Module {
    Module::new("sys")
        .with_attribute("version", Value::string(runtime_version()))
        .with_attribute("platform", Value::string(PLATFORM))
        .with_attribute("executable", Value::string(config.program_name.as_str()))
}

/// Modules importable without any search path, keyed by import name.
pub(crate) fn builtin_modules(config: &RuntimeConfig) -> FxHashMap<String, Rc<Module>> {
    let mut modules = FxHashMap::default();
    for module in [sys_module(config)] {
        modules.insert(module.name().to_string(), Rc::new(module));
    }
    modules
}
