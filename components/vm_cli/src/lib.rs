//! Embedding host CLI for the Karst scripting VM.
//!
//! Provides the [`Runtime`] wrapper the `karst-run` binary drives:
//! modules come from files, scenarios from JSON, and script output goes
//! to stdout.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod host;
pub mod runtime;
pub mod scenario;

pub use cli::Cli;
pub use error::{HostError, HostResult};
pub use host::FileHost;
pub use runtime::Runtime;
pub use scenario::{Scenario, ScriptRef, StartSpec};
