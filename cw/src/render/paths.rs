//! Output path computation
//!
//! Paths here are handled as strings with `/` separators so that a root
//! given as `dir/` keeps its meaning as "the directory `dir`" rather than
//! being normalized away.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sentinel for standard input / standard output
pub const STDIO: &str = "-";

/// Output suffix substitution, e.g. `.tmpl.md` to `.md`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

impl FromStr for Rename {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((from, to)) if !from.is_empty() => Ok(Rename {
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => Err(format!("Invalid rename '{}': expected FROM:TO", s)),
        }
    }
}

/// Apply the longest matching suffix rename (first wins on ties)
pub fn apply_renames(output: &str, renames: &[Rename]) -> String {
    let best = renames
        .iter()
        .filter(|rename| output.ends_with(&rename.from))
        .fold(None::<&Rename>, |best, rename| match best {
            Some(current) if current.from.len() >= rename.from.len() => Some(current),
            _ => Some(rename),
        });

    match best {
        Some(rename) => {
            let stem = &output[..output.len() - rename.from.len()];
            debug!(%output, from = %rename.from, to = %rename.to, "apply_renames: matched");
            format!("{}{}", stem, rename.to)
        }
        None => output.to_string(),
    }
}

/// Directory portion of `path`, like a shell `dirname`
///
/// `"test.txt"` gives `"."`, `"foobar/"` gives `"foobar"`, `"/x"` gives `"/"`.
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        None => ".".to_string(),
        Some(idx) => {
            let dir = path[..idx].trim_end_matches('/');
            if dir.is_empty() {
                if path.starts_with('/') { "/".to_string() } else { ".".to_string() }
            } else {
                dir.to_string()
            }
        }
    }
}

/// Root against which `file`'s output path is made relative
///
/// An explicit base always wins. Otherwise the shortest candidate in
/// `all_files` that prefixes `file` is chosen (first on ties) and its
/// parent returned; with no candidate, `file`'s own parent is used. A
/// candidate directory must end with `/` to be treated as a directory.
pub fn compute_base_directory(file: &str, all_files: &[String], explicit_base: Option<&str>) -> String {
    if let Some(base) = explicit_base
        && !base.is_empty()
    {
        return base.to_string();
    }

    let shortest = all_files
        .iter()
        .filter(|candidate| file.starts_with(candidate.as_str()))
        .fold(None::<&String>, |best, candidate| match best {
            Some(current) if current.len() <= candidate.len() => Some(current),
            _ => Some(candidate),
        });

    match shortest {
        Some(candidate) => parent_dir(candidate),
        None => parent_dir(file),
    }
}

/// Where `file` lands under `output_directory`, mirroring its position below `base`
pub fn mirrored_output(file: &Path, base: &Path, output_directory: &Path) -> PathBuf {
    let relative = if base == Path::new(".") {
        file
    } else {
        file.strip_prefix(base).unwrap_or(file)
    };
    let relative = relative.strip_prefix("/").unwrap_or(relative);
    output_directory.join(relative)
}
