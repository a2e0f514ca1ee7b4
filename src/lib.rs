//! minidistro library.
//!
//! The pipeline is exposed for integration testing: tests drive it with a
//! scripted [`process::Runner`] and a local [`download::Fetcher`] instead of
//! the host toolchain and the network.

pub mod clean;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod finish;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod provision;
pub mod stage;
pub mod timing;
pub mod verify;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineRun, RunState};
