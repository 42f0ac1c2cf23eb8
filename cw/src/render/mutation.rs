//! Deferred program mutations
//!
//! Template helpers such as `flag` or `path` do not touch a program
//! directly. They return a [`Mutation`] encoded as JSON, which `run` and
//! `program` decode and apply, in call order, to their own clone.

use std::collections::BTreeMap;

use programstore::{Program, ProgramError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::error::RenderError;

/// Key identifying a JSON object as an encoded mutation
pub const MUTATION_KEY: &str = "mutation";

/// One field change applied to a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum Mutation {
    Path { path: String },
    Verbs { verbs: Vec<String> },
    Stdin { stdin: String },
    /// Replaces the whole environment mapping
    Env { env: BTreeMap<String, String> },
    AddRawFlag { flags: Vec<String> },
    /// Replaces the raw flag list
    RawFlags { flags: Vec<String> },
    Flag { name: String, value: Value },
    FlagRaw { name: String, raw: String },
    Arg { name: String, value: Value },
    ArgRaw { name: String, raw: String },
}

impl Mutation {
    pub fn apply(&self, program: &mut Program) -> Result<(), ProgramError> {
        debug!(program = %program.name, mutation = ?self, "Mutation::apply: called");
        match self {
            Mutation::Path { path } => program.path = path.clone(),
            Mutation::Verbs { verbs } => program.verbs = verbs.clone(),
            Mutation::Stdin { stdin } => program.stdin = stdin.clone(),
            Mutation::Env { env } => program.env = env.clone(),
            Mutation::AddRawFlag { flags } => program.add_raw_flag(flags.iter().cloned()),
            Mutation::RawFlags { flags } => program.raw_flags = flags.clone(),
            Mutation::Flag { name, value } => program.set_flag_value(name, value)?,
            Mutation::FlagRaw { name, raw } => program.set_flag_raw(name, raw.clone())?,
            Mutation::Arg { name, value } => program.set_arg_value(name, value)?,
            Mutation::ArgRaw { name, raw } => program.set_arg_raw(name, raw.clone())?,
        }
        Ok(())
    }

    /// JSON form handed back to the template
    pub fn to_value(&self) -> Result<Value, RenderError> {
        serde_json::to_value(self).map_err(|e| RenderError::InvalidOption(e.to_string()))
    }
}

/// An option passed to `run` or `program`
#[derive(Debug, Clone, PartialEq)]
pub enum RunOption {
    Mutation(Mutation),
    /// A plain string, appended as a raw flag
    Literal(String),
}

impl RunOption {
    /// Decode a template value: strings are literals, tagged objects are mutations
    pub fn from_value(value: &Value) -> Result<Self, RenderError> {
        match value {
            Value::String(s) => Ok(RunOption::Literal(s.clone())),
            Value::Object(map) if map.contains_key(MUTATION_KEY) => serde_json::from_value(value.clone())
                .map(RunOption::Mutation)
                .map_err(|e| RenderError::InvalidOption(format!("{}: {}", value, e))),
            other => Err(RenderError::InvalidOption(format!(
                "expected a string or a program option, got {}",
                other
            ))),
        }
    }

    pub fn apply(&self, program: &mut Program) -> Result<(), ProgramError> {
        match self {
            RunOption::Mutation(mutation) => mutation.apply(program),
            RunOption::Literal(flag) => {
                program.add_raw_flag([flag.clone()]);
                Ok(())
            }
        }
    }
}
