//! Synth Common Library
//!
//! Shared constants, configuration loading and the process supervision
//! contract used by every crate of the synth workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Record layout and ring sizing constants
//! - [`config`] - Configuration loading traits and types
//! - [`supervisor`] - Process group supervision contract
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! synth_common = { path = "../synth_common" }
//! ```
//!
//! ```rust
//! use synth_common::consts::*;
//! use synth_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod supervisor;
