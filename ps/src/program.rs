//! Program definitions
//!
//! A [`Program`] describes one external command invocation: the executable,
//! sub-command verbs, typed flags and positional arguments, literal raw
//! flags, extra environment and standard input. Definitions are parsed from
//! YAML documents, one program per document:
//!
//! ```yaml
//! name: echoer
//! description: Print a message
//! path: /bin/echo
//! flags:
//!   newline:
//!     type: bool
//!     flag: -n
//! args:
//!   - name: msg
//!     default: hi
//! ```
//!
//! `Clone` is a full deep copy. Shared definitions handed out by the
//! repository are wrapped in `Arc`, so a call site must clone before it can
//! mutate anything.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::error::ProgramError;
use crate::parameter::{Parameter, Resolved};
use crate::shutdown::Shutdown;

/// Ad-hoc values keyed by parameter name, taking precedence over stored values
pub type Overrides = HashMap<String, Value>;

/// A declarative command-line invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Executable to run
    #[serde(default)]
    pub path: String,

    /// Sub-command words inserted before any flag
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,

    /// Flags in declaration order
    #[serde(default, with = "parameter_list", skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<Parameter>,

    /// Positional arguments in declaration order
    #[serde(default, with = "parameter_list", skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Parameter>,

    /// Pre-formatted flags appended after the typed flags
    #[serde(
        default,
        rename = "rawFlags",
        alias = "raw-flags",
        alias = "raw_flags",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub raw_flags: Vec<String>,

    /// Environment merged over the inherited environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Text piped to standard input
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdin: String,
}

impl Program {
    /// Create an empty program with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a definition document
    pub fn from_yaml_str(content: &str) -> Result<Self, ProgramError> {
        let program: Self = serde_yaml::from_str(content)?;
        program.validate()?;
        Ok(program)
    }

    pub fn from_reader(mut reader: impl Read) -> Result<Self, ProgramError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_file(path: &Path) -> Result<Self, ProgramError> {
        debug!(?path, "Program::from_file: called");
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Check names and declared defaults
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.name.trim().is_empty() {
            return Err(ProgramError::Definition("program name must not be empty".to_string()));
        }
        for (kind, params) in [("flag", &self.flags), ("argument", &self.args)] {
            let mut seen = HashSet::new();
            for param in params {
                param.validate()?;
                if !seen.insert(param.name.as_str()) {
                    return Err(ProgramError::Definition(format!(
                        "duplicate {} '{}' in program '{}'",
                        kind, param.name, self.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn flag(&self, name: &str) -> Option<&Parameter> {
        self.flags.iter().find(|p| p.name == name)
    }

    pub fn arg(&self, name: &str) -> Option<&Parameter> {
        self.args.iter().find(|p| p.name == name)
    }

    fn flag_mut(&mut self, name: &str) -> Result<&mut Parameter, ProgramError> {
        let program = self.name.clone();
        self.flags
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ProgramError::UnknownFlag {
                program,
                flag: name.to_string(),
            })
    }

    fn arg_mut(&mut self, name: &str) -> Result<&mut Parameter, ProgramError> {
        let program = self.name.clone();
        self.args
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ProgramError::UnknownArg {
                program,
                arg: name.to_string(),
            })
    }

    pub fn set_flag_value(&mut self, name: &str, value: &Value) -> Result<(), ProgramError> {
        debug!(program = %self.name, %name, "Program::set_flag_value: called");
        self.flag_mut(name)?.set_value(value)
    }

    pub fn set_flag_raw(&mut self, name: &str, raw: impl Into<String>) -> Result<(), ProgramError> {
        debug!(program = %self.name, %name, "Program::set_flag_raw: called");
        self.flag_mut(name)?.set_raw(raw);
        Ok(())
    }

    pub fn set_arg_value(&mut self, name: &str, value: &Value) -> Result<(), ProgramError> {
        debug!(program = %self.name, %name, "Program::set_arg_value: called");
        self.arg_mut(name)?.set_value(value)
    }

    pub fn set_arg_raw(&mut self, name: &str, raw: impl Into<String>) -> Result<(), ProgramError> {
        debug!(program = %self.name, %name, "Program::set_arg_raw: called");
        self.arg_mut(name)?.set_raw(raw);
        Ok(())
    }

    /// Append literal flag tokens in call order
    pub fn add_raw_flag<I, S>(&mut self, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_flags.extend(flags.into_iter().map(Into::into));
    }

    /// Build the argument vector (the executable path is not included)
    ///
    /// Order: verbs, typed flags in declaration order, raw flags, positional
    /// arguments in declaration order. Unset optional parameters are omitted.
    /// Every override must name a declared flag or argument.
    pub fn compute_args(&self, overrides: &Overrides) -> Result<Vec<String>, ProgramError> {
        debug!(program = %self.name, override_count = overrides.len(), "Program::compute_args: called");
        let mut unknown: Vec<&String> = overrides
            .keys()
            .filter(|name| self.flag(name).is_none() && self.arg(name).is_none())
            .collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            return Err(ProgramError::UnknownParameter {
                program: self.name.clone(),
                name: (*name).clone(),
            });
        }

        let mut args = self.verbs.clone();

        for flag in &self.flags {
            match flag.resolve(overrides.get(&flag.name))? {
                Some(Resolved::Raw(raw)) => args.extend([flag.flag_token(), raw]),
                Some(Resolved::Value(value)) => args.extend(value.flag_tokens(&flag.flag_token())),
                None => {}
            }
        }

        args.extend(self.raw_flags.iter().cloned());

        for arg in &self.args {
            match arg.resolve(overrides.get(&arg.name))? {
                Some(Resolved::Raw(raw)) => args.push(raw),
                Some(Resolved::Value(value)) => args.extend(value.arg_tokens()),
                None => {}
            }
        }

        debug!(program = %self.name, ?args, "Program::compute_args: computed");
        Ok(args)
    }

    /// Execute the program, streaming its standard output into `writer`
    ///
    /// Standard error is captured and reported when the exit status is not
    /// successful. Firing `shutdown` kills the child and yields
    /// [`ProgramError::Cancelled`].
    pub async fn run_into_writer<W>(
        &self,
        shutdown: &Shutdown,
        overrides: &Overrides,
        writer: &mut W,
    ) -> Result<(), ProgramError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        debug!(program = %self.name, "Program::run_into_writer: called");
        if self.path.is_empty() {
            return Err(ProgramError::NoPath { name: self.name.clone() });
        }
        if shutdown.is_triggered() {
            return Err(ProgramError::Cancelled);
        }

        let args = self.compute_args(overrides)?;
        info!(program = %self.name, path = %self.path, ?args, "Running program");

        let mut command = Command::new(&self.path);
        command
            .args(&args)
            .envs(&self.env)
            .stdin(if self.stdin.is_empty() { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ProgramError::Spawn {
            path: self.path.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = tokio::select! {
            result = drive(&mut child, stdin, self.stdin.as_bytes(), stdout, stderr, writer) => Some(result),
            _ = shutdown.cancelled() => None,
        };

        let Some(result) = outcome else {
            debug!(program = %self.name, "Program::run_into_writer: cancelled, killing child");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Program::run_into_writer: kill failed");
            }
            return Err(ProgramError::Cancelled);
        };

        let (status, stderr) = result?;
        if !status.success() {
            debug!(program = %self.name, %status, "Program::run_into_writer: non-zero exit");
            return Err(ProgramError::ExitStatus {
                path: self.path.clone(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        debug!(program = %self.name, "Program::run_into_writer: complete");
        Ok(())
    }

    /// Execute the program and return its captured standard output
    pub async fn run_to_string(&self, shutdown: &Shutdown, overrides: &Overrides) -> Result<String, ProgramError> {
        let mut buf: Vec<u8> = Vec::new();
        self.run_into_writer(shutdown, overrides, &mut buf).await?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Feed stdin, stream stdout, collect stderr, then wait for exit
async fn drive<W>(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    input: &[u8],
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    writer: &mut W,
) -> Result<(ExitStatus, Vec<u8>), ProgramError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let feed = async move {
        if let Some(mut stdin) = stdin
            && let Err(e) = stdin.write_all(input).await
        {
            // The child may exit without reading its input
            debug!(error = %e, "drive: stdin write failed");
        }
    };

    let copy = async {
        match stdout {
            Some(mut out) => tokio::io::copy(&mut out, &mut *writer).await.map(|_| ()),
            None => Ok(()),
        }
    };

    let collect = async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr {
            err.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let ((), copied, collected) = tokio::join!(feed, copy, collect);
    copied?;
    let stderr = collected?;
    let status = child.wait().await?;
    writer.flush().await?;
    Ok((status, stderr))
}

/// Parameters serialize as a list and deserialize from either a list or a
/// mapping of name to declaration (document order is kept).
mod parameter_list {
    use std::fmt;

    use serde::de::{MapAccess, SeqAccess, Visitor};
    use serde::{Deserializer, Serialize, Serializer};

    use crate::parameter::Parameter;

    pub fn serialize<S>(params: &[Parameter], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        params.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Parameter>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ParametersVisitor)
    }

    struct ParametersVisitor;

    impl<'de> Visitor<'de> for ParametersVisitor {
        type Value = Vec<Parameter>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of parameter names to declarations, or a list of declarations")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut params = Vec::new();
            while let Some((name, mut param)) = map.next_entry::<String, Parameter>()? {
                param.name = name;
                params.push(param);
            }
            Ok(params)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut params = Vec::new();
            while let Some(param) = seq.next_element::<Parameter>()? {
                params.push(param);
            }
            Ok(params)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }
}
