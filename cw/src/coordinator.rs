//! Render jobs and watch loop composition
//!
//! A [`TemplateJob`] knows which inputs to render and where output goes.
//! It renders everything once, and as a [`WatchHandler`] re-renders single
//! files when they change. [`watch_all`] runs the template loop next to one
//! reload loop per repository until shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use programstore::{FileWatcher, Repository, Shutdown, WatchConfig, WatchError, WatchHandler};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::render::{RenderError, Renderer, STDIO, compute_base_directory, mirrored_output};

/// Where rendered output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    Stdout,
    /// A single output file (only for a single input file)
    File(PathBuf),
    /// Mirror inputs below this directory
    Directory(PathBuf),
}

/// A set of template inputs bound to an output target
#[derive(Debug, Clone)]
pub struct TemplateJob {
    renderer: Renderer,
    inputs: Vec<PathBuf>,
    target: RenderTarget,
}

impl TemplateJob {
    pub fn new(renderer: Renderer, inputs: Vec<PathBuf>, target: RenderTarget) -> Self {
        debug!(?inputs, ?target, "TemplateJob::new: called");
        Self {
            renderer,
            inputs,
            target,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Base-directory candidates: directories carry a trailing separator
    fn candidates(&self) -> Vec<String> {
        self.inputs
            .iter()
            .map(|input| {
                let text = input.to_string_lossy().to_string();
                if input.is_dir() && !text.ends_with('/') {
                    format!("{}/", text)
                } else {
                    text
                }
            })
            .collect()
    }

    /// Output path for one input file
    pub fn output_for(&self, file: &Path) -> PathBuf {
        match &self.target {
            RenderTarget::Stdout => PathBuf::from(STDIO),
            RenderTarget::File(output) => output.clone(),
            RenderTarget::Directory(directory) => {
                let base = compute_base_directory(
                    &file.to_string_lossy(),
                    &self.candidates(),
                    self.renderer.settings().base_directory.as_deref(),
                );
                mirrored_output(file, Path::new(&base), directory)
            }
        }
    }

    /// Render one input file to its output
    pub async fn render_one(&self, file: &Path) -> Result<(), RenderError> {
        let output = self.output_for(file);
        if let Some(parent) = output.parent()
            && output != Path::new(STDIO)
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderError::file(parent, e))?;
        }
        self.renderer.render_file(file, &output).await
    }

    /// Render every input once, stopping at the first failure
    pub async fn render_all(&self) -> Result<(), RenderError> {
        debug!(inputs = ?self.inputs, "TemplateJob::render_all: called");
        for input in &self.inputs {
            if input.is_dir() {
                let RenderTarget::Directory(output) = &self.target else {
                    return Err(RenderError::InvalidOption(format!(
                        "{} is a directory; an output directory is required",
                        input.display()
                    )));
                };
                self.renderer.render_directory(input, output).await?;
            } else {
                self.render_one(input).await?;
            }
        }
        Ok(())
    }

    /// Re-render changed inputs until `shutdown` fires
    pub async fn watch(&self, config: &WatchConfig, shutdown: &Shutdown) -> Result<(), RenderError> {
        let roots: Vec<PathBuf> = self.inputs.iter().filter(|p| p.as_path() != Path::new(STDIO)).cloned().collect();
        info!(?roots, "Watching templates");
        let watcher = FileWatcher::new(roots, &self.renderer.settings().masks, config)?;
        watcher.run(self, shutdown).await?;
        Ok(())
    }
}

#[async_trait]
impl WatchHandler for TemplateJob {
    async fn on_write(&self, path: &Path) -> Result<(), WatchError> {
        match self.render_one(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(WatchError::Cancelled),
            Err(e) => {
                warn!(?path, error = %e, "Failed to render template");
                Ok(())
            }
        }
    }

    async fn on_remove(&self, path: &Path) -> Result<(), WatchError> {
        debug!(?path, "TemplateJob::on_remove: output left in place");
        Ok(())
    }
}

/// Run every repository reload loop and the template loop until shutdown
///
/// Cancellation of the loops is the normal way out and yields `Ok`. The
/// first genuine failure stops the remaining loops and is returned.
pub async fn watch_all(
    repositories: Vec<Arc<Repository>>,
    job: TemplateJob,
    config: WatchConfig,
    shutdown: Shutdown,
) -> Result<(), RenderError> {
    debug!(repository_count = repositories.len(), "watch_all: called");
    let mut tasks = JoinSet::new();

    for repository in repositories {
        let config = config.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move { repository.watch(&config, &shutdown).await.map_err(RenderError::from) });
    }

    tasks.spawn(async move { job.watch(&config, &shutdown).await });

    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("watch_all: loop cancelled"),
            Err(e) => {
                error!(error = %e, "Watch loop failed");
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    info!("All watch loops stopped");
    Ok(())
}
