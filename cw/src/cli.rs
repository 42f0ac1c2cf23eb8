//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::listing::OutputFormat;
use crate::render::{Rename, RenderSettings};

/// cmdweave - templates that run declared programs
#[derive(Debug, Parser)]
#[command(
    name = "cw",
    about = "Render text templates that run declaratively defined command-line programs",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Render template files or directories
    Render(RenderArgs),

    /// List programs defined in repositories
    Ls {
        /// Program repository directory (repeatable)
        #[arg(short = 'r', long = "repository", value_name = "DIR")]
        repositories: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a single program definition and print its output
    Run {
        /// Definition file, or a program name to look up
        #[arg(value_name = "FILE_OR_NAME")]
        target: Option<String>,

        /// Definition file to run
        #[arg(long, conflicts_with_all = ["target", "program"])]
        file: Option<PathBuf>,

        /// Program name to look up in repositories
        #[arg(long, conflicts_with = "target")]
        program: Option<String>,

        /// Program repository directory (repeatable)
        #[arg(short = 'r', long = "repository", value_name = "DIR")]
        repositories: Vec<PathBuf>,
    },
}

/// Arguments of `cw render`
#[derive(Debug, Clone, Default, Args)]
pub struct RenderArgs {
    /// Template files or directories ("-" reads standard input)
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Mirror rendered files below this directory
    #[arg(short = 'o', long)]
    pub output_directory: Option<PathBuf>,

    /// Output file (single input only)
    #[arg(long, conflicts_with = "output_directory")]
    pub output_file: Option<PathBuf>,

    /// Keep running and re-render on change
    #[arg(short, long)]
    pub watch: bool,

    /// Only render files matching this glob (repeatable)
    #[arg(short, long = "mask", value_name = "GLOB")]
    pub masks: Vec<String>,

    /// Disable template expansion (outputs are left empty)
    #[arg(long)]
    pub no_templates: bool,

    /// Custom delimiter pair
    #[arg(long, num_args = 2, value_names = ["LEFT", "RIGHT"])]
    pub delimiters: Option<Vec<String>>,

    /// Let templates create programs no repository defines
    #[arg(long)]
    pub allow_program_creation: bool,

    /// Do not report rendered files
    #[arg(short, long)]
    pub quiet: bool,

    /// Output suffix rename (repeatable)
    #[arg(long = "rename", value_name = "FROM:TO")]
    pub renames: Vec<Rename>,

    /// Root used to mirror output paths
    #[arg(long, value_name = "DIR")]
    pub base_directory: Option<String>,

    /// Program repository directory (repeatable)
    #[arg(short = 'r', long = "repository", value_name = "DIR")]
    pub repositories: Vec<PathBuf>,
}

impl RenderArgs {
    /// Overlay the command line onto configured settings
    ///
    /// Switches only ever turn their behaviour on; lists given on the
    /// command line replace the configured ones.
    pub fn apply(&self, settings: &mut RenderSettings) {
        debug!(?self, "RenderArgs::apply: called");
        if self.no_templates {
            settings.templates = false;
        }
        if self.allow_program_creation {
            settings.allow_program_creation = true;
        }
        if self.quiet {
            settings.verbose = false;
        }
        if let Some(delimiters) = &self.delimiters {
            settings.delimiters = Some(delimiters.clone());
        }
        if !self.masks.is_empty() {
            settings.masks = self.masks.clone();
        }
        if !self.renames.is_empty() {
            settings.renames = self.renames.clone();
        }
        if let Some(base) = &self.base_directory {
            settings.base_directory = Some(base.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_render() {
        let cli = Cli::try_parse_from([
            "cw",
            "-l",
            "debug",
            "render",
            "docs",
            "-o",
            "out",
            "-m",
            "**/*.md",
            "--delimiters",
            "<%",
            "%>",
            "--rename",
            ".tmpl:",
            "-r",
            "programs",
            "-q",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.inputs, vec![PathBuf::from("docs")]);
        assert_eq!(args.output_directory, Some(PathBuf::from("out")));
        assert_eq!(args.masks, vec!["**/*.md"]);
        assert_eq!(args.delimiters, Some(vec!["<%".to_string(), "%>".to_string()]));
        assert_eq!(args.renames[0].from, ".tmpl");
        assert_eq!(args.repositories, vec![PathBuf::from("programs")]);
        assert!(args.quiet);
    }

    #[test]
    fn test_render_requires_input() {
        assert!(Cli::try_parse_from(["cw", "render"]).is_err());
    }

    #[test]
    fn test_output_file_conflicts_with_directory() {
        assert!(Cli::try_parse_from(["cw", "render", "a.md", "-o", "out", "--output-file", "x"]).is_err());
    }

    #[test]
    fn test_parse_ls_format() {
        let cli = Cli::try_parse_from(["cw", "ls", "-r", "a", "-r", "b", "-f", "json"]).unwrap();
        match cli.command {
            Command::Ls { repositories, format } => {
                assert_eq!(repositories.len(), 2);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["cw", "ls", "-f", "table"]).is_err());
    }

    #[test]
    fn test_parse_run_sources_conflict() {
        assert!(Cli::try_parse_from(["cw", "run", "echoer", "--file", "a.yaml"]).is_err());
        assert!(Cli::try_parse_from(["cw", "run", "--file", "a.yaml", "--program", "x"]).is_err());

        let cli = Cli::try_parse_from(["cw", "run", "--program", "echoer", "-r", "programs"]).unwrap();
        match cli.command {
            Command::Run { program, target, .. } => {
                assert_eq!(program.as_deref(), Some("echoer"));
                assert!(target.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_apply_overrides_settings() {
        let mut settings = RenderSettings {
            masks: vec!["**/*.txt".to_string()],
            ..Default::default()
        };
        let args = RenderArgs {
            inputs: vec![PathBuf::from("a")],
            no_templates: true,
            quiet: true,
            masks: vec!["**/*.md".to_string()],
            base_directory: Some("docs".to_string()),
            ..Default::default()
        };
        args.apply(&mut settings);

        assert!(!settings.templates);
        assert!(!settings.verbose);
        assert_eq!(settings.masks, vec!["**/*.md"]);
        assert_eq!(settings.base_directory.as_deref(), Some("docs"));
        assert!(!settings.allow_program_creation);
    }

    #[test]
    fn test_apply_keeps_config_when_flags_absent() {
        let mut settings = RenderSettings {
            delimiters: Some(vec!["[[".to_string(), "]]".to_string()]),
            verbose: false,
            ..Default::default()
        };
        RenderArgs::default().apply(&mut settings);
        assert_eq!(settings.delimiters, Some(vec!["[[".to_string(), "]]".to_string()]));
        assert!(!settings.verbose);
    }
}
