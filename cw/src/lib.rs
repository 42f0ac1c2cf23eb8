//! cmdweave - render text templates that run declared programs
//!
//! Templates call functions such as `run`, `lookup` and `flag` to clone,
//! adjust and execute program definitions from [`programstore`]
//! repositories, splicing the captured output into the rendered document.
//!
//! # Modules
//!
//! - [`render`] - the renderer, template functions and output paths
//! - [`coordinator`] - render jobs and the composed watch loops
//! - [`listing`] - program listings for `cw ls`
//! - [`config`] - configuration loading
//! - [`cli`] - command-line definitions

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod listing;
pub mod render;
