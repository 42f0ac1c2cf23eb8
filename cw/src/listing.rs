//! Program listings for `cw ls`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use colored::Colorize;
use eyre::{Context, Result};
use programstore::{Overrides, Repository};
use serde::Serialize;
use tracing::debug;

/// Output format for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(format!("Unknown format: {}. Use: text, json, or yaml", s)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

/// One row of `cw ls`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramListing {
    pub name: String,
    #[serde(rename = "desc")]
    pub description: String,
    /// Default argument vector joined with spaces
    pub args: String,
    pub source: PathBuf,
}

/// Listings for every program of every repository, sorted by name
pub fn list_programs(repositories: &[Arc<Repository>]) -> Result<Vec<ProgramListing>> {
    debug!(repository_count = repositories.len(), "list_programs: called");
    let mut listings = Vec::new();
    for repository in repositories {
        for entry in repository.entries()? {
            let args = entry
                .program
                .compute_args(&Overrides::new())
                .with_context(|| format!("Failed to compute arguments for {}", entry.program.name))?;
            listings.push(ProgramListing {
                name: entry.program.name.clone(),
                description: entry.program.description.clone(),
                args: args.join(" "),
                source: entry.path.clone(),
            });
        }
    }
    listings.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listings)
}

/// Render listings in the requested format
pub fn format_listings(listings: &[ProgramListing], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(listings)? + "\n"),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(listings)?),
        OutputFormat::Text => {
            if listings.is_empty() {
                return Ok("No programs found.\n".to_string());
            }
            let width = listings.iter().map(|l| l.name.len()).max().unwrap_or(0);
            let mut out = String::new();
            for listing in listings {
                out.push_str(&format!(
                    "{}  {}\n",
                    format!("{:width$}", listing.name, width = width).bold(),
                    listing.description
                ));
                if !listing.args.is_empty() {
                    out.push_str(&format!("{:width$}  {}\n", "", listing.args.dimmed(), width = width));
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repository(files: &[(&str, &str)]) -> (TempDir, Arc<Repository>) {
        let temp = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(temp.path().join(name), content).unwrap();
        }
        let repo = Arc::new(Repository::new([temp.path()]));
        repo.load().unwrap();
        (temp, repo)
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("yml".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_list_programs_sorted_with_default_args() {
        let (_temp, repo) = repository(&[
            (
                "b.yaml",
                "name: zeta\ndescription: last\npath: ls\nverbs: [\"-l\"]\nargs:\n  - name: dir\n    default: /tmp\n",
            ),
            ("a.yaml", "name: alpha\ndescription: first\npath: /bin/true\n"),
        ]);

        let listings = list_programs(&[repo]).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "alpha");
        assert_eq!(listings[0].args, "");
        assert_eq!(listings[1].name, "zeta");
        assert_eq!(listings[1].args, "-l /tmp");
        assert_eq!(listings[1].description, "last");
    }

    #[test]
    fn test_list_programs_missing_required_fails() {
        let (_temp, repo) = repository(&[(
            "a.yaml",
            "name: needy\nargs:\n  - name: file\n    required: true\n",
        )]);
        assert!(list_programs(&[repo]).is_err());
    }

    #[test]
    fn test_format_json_and_yaml() {
        let listings = vec![ProgramListing {
            name: "echoer".to_string(),
            description: "says hi".to_string(),
            args: "hi".to_string(),
            source: PathBuf::from("/r/echoer.yaml"),
        }];

        let json: serde_json::Value = serde_json::from_str(&format_listings(&listings, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["name"], "echoer");
        assert_eq!(json[0]["desc"], "says hi");

        let yaml = format_listings(&listings, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("name: echoer"));

        colored::control::set_override(false);
        let text = format_listings(&listings, OutputFormat::Text).unwrap();
        assert!(text.contains("echoer  says hi"));
        assert!(text.contains("hi"));
    }
}
