//! Template functions bridging to the program store
//!
//! Every function is one [`ProgramHelper`] registered under its
//! [`ProgramFunction`] name. Mutation functions return tagged JSON objects
//! (see [`Mutation`]) which `run` and `program` decode and apply in order.
//!
//! ```text
//! {{run "git-log" (flag "max-count" 5) "--oneline"}}
//! {{run (program "ad-hoc" (path "/bin/date") (add_raw_flag "+%Y"))}}
//! {{run "echoer" msg="hello"}}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use handlebars::{
    Context, Handlebars, Helper, HelperDef, RenderContext, RenderError as TemplateRenderError, RenderErrorReason,
    ScopedJson,
};
use programstore::{Overrides, Program, Repository, Shutdown};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use super::error::RenderError;
use super::mutation::{Mutation, RunOption};

/// Where template lookups find programs
///
/// Local programs are consulted first, then each repository in order.
#[derive(Debug, Clone, Default)]
pub struct ProgramSources {
    pub local: HashMap<String, Arc<Program>>,
    pub repositories: Vec<Arc<Repository>>,
    pub allow_creation: bool,
}

impl ProgramSources {
    /// Find a shared program by name; first match wins
    pub fn lookup(&self, name: &str) -> Result<Arc<Program>, RenderError> {
        debug!(%name, "ProgramSources::lookup: called");
        if let Some(program) = self.local.get(name) {
            return Ok(program.clone());
        }
        for repository in &self.repositories {
            if let Some(program) = repository.get(name)? {
                return Ok(program);
            }
        }
        Err(RenderError::NotFound(name.to_string()))
    }

    /// A fresh, empty program, if creation is allowed
    pub fn create(&self, name: &str) -> Result<Program, RenderError> {
        if !self.allow_creation {
            return Err(RenderError::CreationDisabled);
        }
        debug!(%name, "ProgramSources::create: creating empty program");
        Ok(Program::new(name))
    }

    /// An owned copy of the named program, falling back to creation
    pub fn resolve(&self, name: &str) -> Result<Program, RenderError> {
        match self.lookup(name) {
            Ok(program) => Ok((*program).clone()),
            Err(RenderError::NotFound(_)) if self.allow_creation => self.create(name),
            Err(e) => Err(e),
        }
    }
}

/// State shared by every helper of one template registry
#[derive(Debug)]
pub struct HelperScope {
    pub sources: ProgramSources,
    pub handle: Handle,
    pub shutdown: Shutdown,
}

/// Functions exposed to templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFunction {
    Lookup,
    Program,
    Path,
    Verbs,
    Stdin,
    Env,
    AddRawFlag,
    RawFlags,
    Flag,
    FlagRaw,
    Arg,
    ArgRaw,
    Run,
}

impl ProgramFunction {
    pub const ALL: [ProgramFunction; 13] = [
        Self::Lookup,
        Self::Program,
        Self::Path,
        Self::Verbs,
        Self::Stdin,
        Self::Env,
        Self::AddRawFlag,
        Self::RawFlags,
        Self::Flag,
        Self::FlagRaw,
        Self::Arg,
        Self::ArgRaw,
        Self::Run,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Program => "program",
            Self::Path => "path",
            Self::Verbs => "verbs",
            Self::Stdin => "stdin",
            Self::Env => "env",
            Self::AddRawFlag => "add_raw_flag",
            Self::RawFlags => "raw_flags",
            Self::Flag => "flag",
            Self::FlagRaw => "flag_raw",
            Self::Arg => "arg",
            Self::ArgRaw => "arg_raw",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for ProgramFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Register every program function on `registry`
///
/// Replaces the engine's built-in `lookup`.
pub fn register_all(registry: &mut Handlebars<'static>, scope: Arc<HelperScope>) {
    for function in ProgramFunction::ALL {
        registry.register_helper(
            function.name(),
            Box::new(ProgramHelper {
                function,
                scope: scope.clone(),
            }),
        );
    }
}

/// One template function bound to a scope
#[derive(Debug, Clone)]
pub struct ProgramHelper {
    function: ProgramFunction,
    scope: Arc<HelperScope>,
}

impl ProgramHelper {
    pub fn new(function: ProgramFunction, scope: Arc<HelperScope>) -> Self {
        Self { function, scope }
    }

    /// Evaluate with already-extracted positional and hash arguments
    pub fn evaluate(&self, params: &[Value], hash: &BTreeMap<String, Value>) -> Result<Value, RenderError> {
        debug!(function = %self.function, param_count = params.len(), "ProgramHelper::evaluate: called");
        let function = self.function;
        match function {
            ProgramFunction::Lookup => {
                let name = string_param(function, params, 0)?;
                let program = self.scope.sources.lookup(&name)?;
                program_to_value(&program)
            }
            ProgramFunction::Program => {
                let name = string_param(function, params, 0)?;
                let mut program = self.scope.sources.create(&name)?;
                apply_options(&mut program, &params[1..])?;
                program_to_value(&program)
            }
            ProgramFunction::Path => Mutation::Path {
                path: string_param(function, params, 0)?,
            }
            .to_value(),
            ProgramFunction::Verbs => Mutation::Verbs {
                verbs: string_list(function, params)?,
            }
            .to_value(),
            ProgramFunction::Stdin => Mutation::Stdin {
                stdin: string_param(function, params, 0)?,
            }
            .to_value(),
            ProgramFunction::Env => Mutation::Env {
                env: env_mapping(function, params, hash)?,
            }
            .to_value(),
            ProgramFunction::AddRawFlag => Mutation::AddRawFlag {
                flags: string_list(function, params)?,
            }
            .to_value(),
            ProgramFunction::RawFlags => Mutation::RawFlags {
                flags: string_list(function, params)?,
            }
            .to_value(),
            ProgramFunction::Flag => Mutation::Flag {
                name: string_param(function, params, 0)?,
                value: value_param(function, params, 1)?,
            }
            .to_value(),
            ProgramFunction::FlagRaw => Mutation::FlagRaw {
                name: string_param(function, params, 0)?,
                raw: string_param(function, params, 1)?,
            }
            .to_value(),
            ProgramFunction::Arg => Mutation::Arg {
                name: string_param(function, params, 0)?,
                value: value_param(function, params, 1)?,
            }
            .to_value(),
            ProgramFunction::ArgRaw => Mutation::ArgRaw {
                name: string_param(function, params, 0)?,
                raw: string_param(function, params, 1)?,
            }
            .to_value(),
            ProgramFunction::Run => self.run(params, hash).map(Value::String),
        }
    }

    /// Resolve, clone, mutate and execute a program; returns its stdout
    fn run(&self, params: &[Value], hash: &BTreeMap<String, Value>) -> Result<String, RenderError> {
        let Some(target) = params.first() else {
            return Err(missing(ProgramFunction::Run, 0));
        };

        let mut program = match target {
            Value::String(name) => self.scope.sources.resolve(name)?,
            Value::Object(_) => {
                let program: Program = serde_json::from_value(target.clone())
                    .map_err(|e| RenderError::InvalidOption(format!("not a program: {}", e)))?;
                program.validate()?;
                program
            }
            other => {
                return Err(RenderError::InvalidOption(format!(
                    "run expects a program name or a program, got {}",
                    other
                )));
            }
        };

        apply_options(&mut program, &params[1..])?;

        let overrides: Overrides = hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        debug!(program = %program.name, override_count = overrides.len(), "ProgramHelper::run: executing");
        let output = self
            .scope
            .handle
            .block_on(program.run_to_string(&self.scope.shutdown, &overrides))?;
        Ok(output)
    }
}

impl HelperDef for ProgramHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, TemplateRenderError> {
        let params: Vec<Value> = h.params().iter().map(|p| p.value().clone()).collect();
        let hash: BTreeMap<String, Value> = h
            .hash()
            .iter()
            .map(|(k, v)| (k.to_string(), v.value().clone()))
            .collect();

        self.evaluate(&params, &hash)
            .map(ScopedJson::Derived)
            .map_err(|e| RenderErrorReason::Other(format!("{}: {}", self.function, e)).into())
    }
}

fn apply_options(program: &mut Program, options: &[Value]) -> Result<(), RenderError> {
    for option in options {
        RunOption::from_value(option)?.apply(program)?;
    }
    Ok(())
}

fn program_to_value(program: &Program) -> Result<Value, RenderError> {
    serde_json::to_value(program).map_err(|e| RenderError::InvalidOption(e.to_string()))
}

fn missing(function: ProgramFunction, index: usize) -> RenderError {
    RenderError::InvalidOption(format!("{} is missing parameter {}", function, index + 1))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_param(function: ProgramFunction, params: &[Value], index: usize) -> Result<Value, RenderError> {
    params.get(index).cloned().ok_or_else(|| missing(function, index))
}

fn string_param(function: ProgramFunction, params: &[Value], index: usize) -> Result<String, RenderError> {
    let value = params.get(index).ok_or_else(|| missing(function, index))?;
    scalar_text(value)
        .ok_or_else(|| RenderError::InvalidOption(format!("{} expects text, got {}", function, value)))
}

/// Variadic strings; array parameters are flattened
fn string_list(function: ProgramFunction, params: &[Value]) -> Result<Vec<String>, RenderError> {
    let mut items = Vec::new();
    for param in params {
        match param {
            Value::Array(values) => {
                for value in values {
                    items.push(scalar_text(value).ok_or_else(|| {
                        RenderError::InvalidOption(format!("{} expects text, got {}", function, value))
                    })?);
                }
            }
            scalar => items.push(scalar_text(scalar).ok_or_else(|| {
                RenderError::InvalidOption(format!("{} expects text, got {}", function, scalar))
            })?),
        }
    }
    Ok(items)
}

/// `env KEY="value"` or `env <mapping>`
fn env_mapping(
    function: ProgramFunction,
    params: &[Value],
    hash: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, String>, RenderError> {
    let entries: Vec<(String, Value)> = match params.first() {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(other) => {
            return Err(RenderError::InvalidOption(format!(
                "{} expects a mapping or key=value arguments, got {}",
                function, other
            )));
        }
        None => Vec::new(),
    };

    entries
        .into_iter()
        .chain(hash.iter().map(|(k, v)| (k.clone(), v.clone())))
        .map(|(key, value)| {
            scalar_text(&value)
                .map(|text| (key.clone(), text))
                .ok_or_else(|| RenderError::InvalidOption(format!("{}: value for {} must be text", function, key)))
        })
        .collect()
}
