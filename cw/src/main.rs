//! cw - render templates that run declared programs
//!
//! CLI entry point for rendering, listing and running program definitions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, bail, eyre};
use programstore::shutdown::{self, ShutdownTrigger};
use programstore::{Overrides, Program, Repository};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use cmdweave::cli::{Cli, Command, RenderArgs};
use cmdweave::config::Config;
use cmdweave::coordinator::{RenderTarget, TemplateJob, watch_all};
use cmdweave::listing::{OutputFormat, format_listings, list_programs};
use cmdweave::render::Renderer;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Stdout carries rendered output, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    debug!("Logging initialized (level: {:?})", level);
}

/// Fire `trigger` on Ctrl-C
fn cancel_on_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            trigger.trigger();
        }
    });
}

/// Load the repositories named on the command line, or the configured ones
fn load_repositories(configured: &[PathBuf], cli: &[PathBuf]) -> Result<Vec<Arc<Repository>>> {
    let directories = if cli.is_empty() { configured } else { cli };
    debug!(?directories, "load_repositories: called");
    if directories.is_empty() {
        return Ok(Vec::new());
    }

    let repository = Repository::new(directories);
    repository.load().context("Failed to load program repositories")?;
    info!(programs = repository.len()?, "Loaded program repositories");
    Ok(vec![Arc::new(repository)])
}

async fn render(args: RenderArgs, config: Config) -> Result<()> {
    debug!(?args, "render: called");
    let mut settings = config.render.clone();
    args.apply(&mut settings);

    let target = match (&args.output_file, &args.output_directory) {
        (Some(file), _) => {
            if args.inputs.len() != 1 {
                bail!("--output-file requires exactly one input");
            }
            RenderTarget::File(file.clone())
        }
        (None, Some(directory)) => RenderTarget::Directory(directory.clone()),
        (None, None) => RenderTarget::Stdout,
    };

    let repositories = load_repositories(&config.repositories, &args.repositories)?;
    let (trigger, shutdown) = shutdown::channel();
    cancel_on_ctrl_c(trigger);

    let mut renderer = Renderer::new(settings)
        .context("Invalid render settings")?
        .with_shutdown(shutdown.clone());
    for repository in &repositories {
        renderer = renderer.with_repository(repository.clone());
    }

    let job = TemplateJob::new(renderer, args.inputs.clone(), target);
    match job.render_all().await {
        Err(e) if e.is_cancelled() => {
            info!("Render interrupted");
            return Ok(());
        }
        result => result.context("Render failed")?,
    }

    if args.watch {
        info!("Watching for changes, press Ctrl-C to stop");
        match watch_all(repositories, job, config.watch.clone(), shutdown).await {
            Err(e) if e.is_cancelled() => info!("Watch interrupted"),
            result => result.context("Watch failed")?,
        }
    }
    Ok(())
}

async fn ls(repositories: Vec<PathBuf>, format: OutputFormat, config: Config) -> Result<()> {
    let repositories = load_repositories(&config.repositories, &repositories)?;
    let listings = list_programs(&repositories)?;
    print!("{}", format_listings(&listings, format)?);
    Ok(())
}

async fn run(
    target: Option<String>,
    file: Option<PathBuf>,
    name: Option<String>,
    repositories: Vec<PathBuf>,
    config: Config,
) -> Result<()> {
    let (file, name) = match (target, file, name) {
        (Some(target), None, None) if Path::new(&target).is_file() => (Some(PathBuf::from(target)), None),
        (Some(target), None, None) => (None, Some(target)),
        (None, Some(file), None) => (Some(file), None),
        (None, None, Some(name)) => (None, Some(name)),
        _ => bail!("Exactly one of FILE_OR_NAME, --file or --program is required"),
    };

    let program = match (file, name) {
        (Some(file), _) => Arc::new(
            Program::from_file(&file).with_context(|| format!("Failed to load program from {}", file.display()))?,
        ),
        (None, Some(name)) => {
            let repositories = load_repositories(&config.repositories, &repositories)?;
            let mut found = None;
            for repository in &repositories {
                if let Some(program) = repository.get(&name)? {
                    found = Some(program);
                    break;
                }
            }
            found.ok_or_else(|| eyre!("Program {} not found", name))?
        }
        (None, None) => bail!("No program to run"),
    };

    let (trigger, shutdown) = shutdown::channel();
    cancel_on_ctrl_c(trigger);

    let mut stdout = tokio::io::stdout();
    match program.run_into_writer(&shutdown, &Overrides::new(), &mut stdout).await {
        Err(e) if e.is_cancelled() => info!(program = %program.name, "Run interrupted"),
        result => result.with_context(|| format!("Failed to run {}", program.name))?,
    }
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Render(args) => render(args, config).await,
        Command::Ls { repositories, format } => ls(repositories, format, config).await,
        Command::Run {
            target,
            file,
            program,
            repositories,
        } => run(target, file, program, repositories, config).await,
    }
}
