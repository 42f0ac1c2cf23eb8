//! ProgramStore - declarative command-line program definitions
//!
//! A program definition is a YAML document describing one external command
//! invocation: executable, verbs, typed flags and arguments, raw flags,
//! environment and standard input. Definitions live in one or more
//! repository directories and are indexed by name.
//!
//! # Modules
//!
//! - [`parameter`] - typed flag/argument declarations and serialization
//! - [`program`] - the program model, argument vector and execution
//! - [`repository`] - the live, lock-guarded name index
//! - [`watch`] - polling file watcher feeding reloads
//! - [`shutdown`] - cooperative cancellation
//!
//! # Example
//!
//! ```ignore
//! use programstore::{Overrides, Repository, Shutdown};
//!
//! let repo = Repository::new(["./programs"]);
//! repo.load()?;
//! let program = repo.get("echoer")?.expect("defined");
//! let mut local = (*program).clone();
//! local.add_raw_flag(["-n"]);
//! let output = local.run_to_string(&Shutdown::never(), &Overrides::new()).await?;
//! ```

pub mod error;
pub mod parameter;
pub mod program;
pub mod repository;
pub mod shutdown;
pub mod watch;

pub use error::{ProgramError, RepositoryError, WatchError};
pub use parameter::{Parameter, ParameterType, ParameterValue, Resolved};
pub use program::{Overrides, Program};
pub use repository::{Repository, RepositoryProgram, definition_files, is_definition_file};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use watch::{DEFINITION_MASKS, FileEvent, FileWatcher, WatchConfig, WatchHandler, compile_masks, matches_masks};
