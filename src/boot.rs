//! The Nyx boot sequence: greet, bring up the embedded runtime, run the boot
//! scripts, tear the runtime down.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};

use crate::runtime::{Runtime, RuntimeConfig, RuntimeStats};

pub const DEFAULT_GREETING: &str = "Hello from Nyx OS!";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    Inline { source: String },
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootScript {
    pub name: String,
    #[serde(flatten)]
    pub source: ScriptSource,
}

impl BootScript {
    pub fn inline(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ScriptSource::Inline {
                source: source.into(),
            },
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            source: ScriptSource::File { path },
        }
    }

    fn load(&self) -> Result<String> {
        match &self.source {
            ScriptSource::Inline { source } => Ok(source.clone()),
            ScriptSource::File { path } => fs::read_to_string(path)
                .with_context(|| format!("Reading boot script {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootManifest {
    /// Written to the console before the runtime comes up; `None` skips it.
    pub greeting: Option<String>,
    pub runtime: RuntimeConfig,
    pub scripts: Vec<BootScript>,
}

impl Default for BootManifest {
    fn default() -> Self {
        Self {
            greeting: Some(DEFAULT_GREETING.to_string()),
            runtime: RuntimeConfig::default(),
            scripts: vec![
                BootScript::inline("hello", "print('Hello from Embedded Python')"),
                BootScript::inline("version", "import sys\nprint(sys.version)"),
            ],
        }
    }
}

impl BootManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading boot manifest {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml(&raw, base_dir)
            .with_context(|| format!("Parsing boot manifest {}", path.display()))
    }

    /// Parses a manifest, resolving relative script paths against `base_dir`.
    pub fn from_yaml(raw: &str, base_dir: &Path) -> Result<Self> {
        let mut manifest: BootManifest = serde_yaml::from_str(raw)?;
        for script in &mut manifest.scripts {
            if let ScriptSource::File { path } = &mut script.source
                && path.is_relative()
            {
                *path = base_dir.join(&*path);
            }
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    pub scripts_run: usize,
    pub failures: Vec<ScriptFailure>,
    pub stats: RuntimeStats,
}

impl BootReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the boot sequence, writing the greeting and all script output to `out`.
///
/// A failing script is recorded and the remaining scripts still run. Errors
/// are returned only for console I/O and runtime setup failures.
pub fn boot<W: Write>(manifest: &BootManifest, mut out: W) -> Result<BootReport> {
    if let Some(greeting) = &manifest.greeting {
        writeln!(out, "{greeting}").context("Writing greeting")?;
    }

    let mut runtime = Runtime::initialize(manifest.runtime.clone(), out)?;
    info!(scripts = manifest.scripts.len(), "embedded runtime up");

    let mut report = BootReport::default();
    for script in &manifest.scripts {
        report.scripts_run += 1;
        let outcome = script
            .load()
            .and_then(|source| runtime.run_simple_string(&source));
        if let Err(err) = outcome {
            let message = format!("{err:#}");
            error!("script '{}' failed: {message}", script.name);
            report.failures.push(ScriptFailure {
                name: script.name.clone(),
                message,
            });
        }
    }

    let finalized = runtime.finalize()?;
    report.stats = finalized.stats;
    info!(
        failures = report.failures.len(),
        statements = report.stats.statements_executed,
        "boot sequence complete"
    );
    Ok(report)
}
