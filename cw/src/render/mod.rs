//! Template rendering with program functions
//!
//! - [`renderer`] - the [`Renderer`] and its settings
//! - [`helpers`] - the functions templates call (`run`, `lookup`, `flag`, ...)
//! - [`mutation`] - deferred program mutations passed between functions
//! - [`paths`] - output paths, renames and base directories

mod error;
pub mod helpers;
pub mod mutation;
pub mod paths;
mod renderer;

pub use error::RenderError;
pub use helpers::{ProgramFunction, ProgramSources};
pub use mutation::{Mutation, RunOption};
pub use paths::{Rename, STDIO, compute_base_directory, mirrored_output, parent_dir};
pub use renderer::{RenderSettings, Renderer, translate_delimiters};
