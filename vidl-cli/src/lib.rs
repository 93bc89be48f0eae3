//! Library target for the `vidl` package.
//!
//! The primary deliverable of this package is the `vidl` CLI binary
//! (`src/main.rs`). Argument parsing, config merging and result rendering
//! live here so they can be tested without spawning the binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod output;

#[doc(hidden)]
pub use vidl_engine;
