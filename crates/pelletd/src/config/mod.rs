//! Configuration file parsing and structures.
//!
//! pelletd reads TOML in two layers: a defaults file shipped with the daemon and
//! an optional local file whose keys override the defaults. Every field has a
//! built-in default, so only the `[[devices]]` list is mandatory.

#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod located;
mod partial;

pub use config::*;
pub use diagnostics::{format_diagnostics, Diagnostic, Diagnostics, LoadError, Warning};
pub use located::Located;
