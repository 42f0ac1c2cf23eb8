//! Template renderer
//!
//! Templates are handlebars documents rendered with no data context: all
//! dynamic content comes from the program functions in
//! [`helpers`](super::helpers). Rendering happens on the blocking pool so
//! nested `run` calls can drive child processes through the runtime handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use glob::Pattern;
use handlebars::Handlebars;
use programstore::{Program, Repository, Shutdown, compile_masks, matches_masks};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::error::RenderError;
use super::helpers::{HelperScope, ProgramSources, register_all};
use super::paths::{Rename, STDIO, apply_renames};

/// Native handlebars delimiters
const NATIVE_OPEN: &str = "{{";
const NATIVE_CLOSE: &str = "}}";

/// Renderer behaviour, shared by configuration and the command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RenderSettings {
    /// Expand templates; when false, rendering writes nothing
    pub templates: bool,

    /// Reserved switch for marker recognition; carried but not interpreted
    pub markers: bool,

    /// Custom `[left, right]` delimiter pair
    pub delimiters: Option<Vec<String>>,

    /// Let templates create programs that no source defines
    pub allow_program_creation: bool,

    /// Globs restricting directory renders and watches (empty = all files)
    pub masks: Vec<String>,

    /// Output suffix substitutions
    pub renames: Vec<Rename>,

    /// Explicit root for mirrored output paths
    pub base_directory: Option<String>,

    /// Print a line per rendered file
    pub verbose: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            templates: true,
            markers: false,
            delimiters: None,
            allow_program_creation: false,
            masks: Vec::new(),
            renames: Vec::new(),
            base_directory: None,
            verbose: true,
        }
    }
}

/// Renders templates, files and directory trees
#[derive(Debug, Clone)]
pub struct Renderer {
    settings: RenderSettings,
    masks: Vec<Pattern>,
    sources: Arc<ProgramSources>,
    shutdown: Shutdown,
}

impl Renderer {
    pub fn new(settings: RenderSettings) -> Result<Self, RenderError> {
        debug!(?settings, "Renderer::new: called");
        let masks = compile_masks(&settings.masks)?;
        let sources = ProgramSources {
            allow_creation: settings.allow_program_creation,
            ..Default::default()
        };
        Ok(Self {
            settings,
            masks,
            sources: Arc::new(sources),
            shutdown: Shutdown::never(),
        })
    }

    /// Add programs consulted before any repository
    pub fn with_programs<I>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = Program>,
    {
        let sources = Arc::make_mut(&mut self.sources);
        for program in programs {
            sources.local.insert(program.name.clone(), Arc::new(program));
        }
        self
    }

    /// Append a repository to the lookup order
    pub fn with_repository(mut self, repository: Arc<Repository>) -> Self {
        Arc::make_mut(&mut self.sources).repositories.push(repository);
        self
    }

    /// Cancel in-flight program runs when `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn sources(&self) -> &ProgramSources {
        &self.sources
    }

    /// True if `relative` passes the configured masks
    pub fn matches(&self, relative: &Path) -> bool {
        matches_masks(&self.masks, relative)
    }

    /// Build a registry holding `source` as template `name`, with the
    /// program functions bound to the current runtime
    pub fn create_template(&self, name: &str, source: &str) -> Result<Handlebars<'static>, RenderError> {
        self.create_template_with(Handle::try_current()?, name, source)
    }

    fn create_template_with(
        &self,
        handle: Handle,
        name: &str,
        source: &str,
    ) -> Result<Handlebars<'static>, RenderError> {
        debug!(%name, source_len = source.len(), "Renderer::create_template: called");
        let source = match &self.settings.delimiters {
            None => source.to_string(),
            Some(delimiters) => match delimiters.as_slice() {
                [left, right] => translate_delimiters(source, left, right),
                _ => return Err(RenderError::InvalidDelimiters(delimiters.clone())),
            },
        };

        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        register_all(
            &mut registry,
            Arc::new(HelperScope {
                sources: (*self.sources).clone(),
                handle,
                shutdown: self.shutdown.clone(),
            }),
        );
        registry.register_template_string(name, source)?;
        Ok(registry)
    }

    /// Execute a template and return its output
    pub async fn render_string(&self, input: &str) -> Result<String, RenderError> {
        let handle = Handle::try_current()?;
        let renderer = self.clone();
        let input = input.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let registry = renderer.create_template_with(handle, "template", &input)?;
            Ok::<_, RenderError>(registry.render("template", &())?)
        })
        .await?;

        match result {
            Err(_) if self.shutdown.is_triggered() => Err(RenderError::Cancelled),
            other => other,
        }
    }

    /// Read all of `reader`, render it and write the result
    ///
    /// Writes nothing when templates are disabled.
    pub async fn render<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), RenderError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut input = String::new();
        reader.read_to_string(&mut input).await?;
        if !self.settings.templates {
            debug!("Renderer::render: templates disabled, skipping");
            return Ok(());
        }
        let output = self.render_string(&input).await?;
        writer.write_all(output.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Render `file` into `output_file`, `-` meaning stdin/stdout
    ///
    /// The configured renames are applied to `output_file`. The output is
    /// only written once the whole template rendered successfully.
    pub async fn render_file(&self, file: &Path, output_file: &Path) -> Result<(), RenderError> {
        let output_file = PathBuf::from(apply_renames(&output_file.to_string_lossy(), &self.settings.renames));
        debug!(?file, ?output_file, "Renderer::render_file: called");
        if self.settings.verbose {
            eprintln!(
                "{} {} -> {}",
                "Rendering".green(),
                file.display(),
                output_file.display().to_string().bold()
            );
        }

        let mut rendered: Vec<u8> = Vec::new();
        if file == Path::new(STDIO) {
            self.render(&mut tokio::io::stdin(), &mut rendered).await?;
        } else {
            let mut input = tokio::fs::File::open(file)
                .await
                .map_err(|e| RenderError::file(file, e))?;
            self.render(&mut input, &mut rendered).await?;
        }

        if file == Path::new(STDIO) || output_file == Path::new(STDIO) {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&rendered).await?;
            stdout.flush().await?;
        } else {
            tokio::fs::write(&output_file, &rendered)
                .await
                .map_err(|e| RenderError::file(&output_file, e))?;
        }
        info!(?file, output = ?output_file, "Rendered file");
        Ok(())
    }

    /// Render every matching file below `directory` into `output_directory`
    ///
    /// Stops at the first failing file. Returns the number of files rendered.
    pub async fn render_directory(&self, directory: &Path, output_directory: &Path) -> Result<usize, RenderError> {
        let directory = with_trailing_separator(directory);
        debug!(?directory, ?output_directory, "Renderer::render_directory: called");

        let files = {
            let directory = directory.clone();
            let masks = self.masks.clone();
            tokio::task::spawn_blocking(move || collect_files(&directory, &masks)).await??
        };

        for (file, relative) in &files {
            let output_file = output_directory.join(relative);
            if let Some(parent) = output_file.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RenderError::file(parent, e))?;
            }
            self.render_file(file, &output_file).await?;
        }

        info!(?directory, count = files.len(), "Rendered directory");
        Ok(files.len())
    }
}

fn with_trailing_separator(directory: &Path) -> PathBuf {
    let text = directory.to_string_lossy();
    if text.ends_with(std::path::MAIN_SEPARATOR) {
        directory.to_path_buf()
    } else {
        PathBuf::from(format!("{}{}", text, std::path::MAIN_SEPARATOR))
    }
}

/// Files below `directory` passing `masks`, with their relative paths
fn collect_files(directory: &Path, masks: &[Pattern]) -> Result<Vec<(PathBuf, PathBuf)>, RenderError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name().min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(directory).unwrap_or(entry.path()).to_path_buf();
        if !matches_masks(masks, &relative) {
            debug!(path = ?entry.path(), "collect_files: skipped by masks");
            continue;
        }
        files.push((entry.into_path(), relative));
    }
    Ok(files)
}

/// Rewrite `left`/`right` delimited tags to native `{{`/`}}`
///
/// Native openers appearing in plain text are escaped so they render
/// verbatim. Inside a tag, quoted string literals are copied as-is, so a
/// closing delimiter within quotes does not end the tag.
pub fn translate_delimiters(source: &str, left: &str, right: &str) -> String {
    if left == NATIVE_OPEN && right == NATIVE_CLOSE {
        return source.to_string();
    }

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut inside = false;
    let mut quote: Option<char> = None;
    while !rest.is_empty() {
        if let Some(open) = quote {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == open {
                    quote = None;
                }
            }
            rest = chars.as_str();
        } else if !inside && !left.is_empty() && rest.starts_with(left) {
            out.push_str(NATIVE_OPEN);
            rest = &rest[left.len()..];
            inside = true;
        } else if inside && !right.is_empty() && rest.starts_with(right) {
            out.push_str(NATIVE_CLOSE);
            rest = &rest[right.len()..];
            inside = false;
        } else if !inside && rest.starts_with(NATIVE_OPEN) {
            out.push_str("\\{{");
            rest = &rest[NATIVE_OPEN.len()..];
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
                if inside && (c == '"' || c == '\'') {
                    quote = Some(c);
                }
            }
            rest = chars.as_str();
        }
    }
    out
}
