//! Command-line argument definitions.

use crate::scenario::{Scenario, ScriptRef, StartSpec};

use core_types::Word;

use clap::Parser;

use std::path::PathBuf;

/// Karst scripting VM module runner.
#[derive(Debug, Parser)]
#[command(name = "karst-run", version, about)]
pub struct Cli {
    /// Module files to load and link, first module first.
    pub modules: Vec<String>,

    /// JSON scenario file; replaces the module and start arguments.
    #[arg(long)]
    pub scenario: Option<PathBuf>,

    /// Script to start, by number or name. Repeatable.
    #[arg(long = "start", value_name = "SCRIPT")]
    pub starts: Vec<String>,

    /// Branch budget per instruction slice; zero is unlimited.
    #[arg(long, default_value_t = 0)]
    pub branch_limit: Word,

    /// Ticks to run; the run ends early once no threads remain.
    #[arg(long, default_value_t = 100)]
    pub ticks: u32,

    /// Directory module names resolve against.
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Write the VM state to this file after the run.
    #[arg(long, value_name = "FILE")]
    pub save_state: Option<PathBuf>,

    /// Restore the VM state from this file instead of loading modules.
    #[arg(long, value_name = "FILE", conflicts_with = "scenario")]
    pub load_state: Option<PathBuf>,
}

impl Cli {
    /// Builds a scenario from the direct command-line arguments.
    pub fn to_scenario(&self) -> Scenario {
        Scenario {
            modules: self.modules.clone(),
            starts: self.starts.iter().map(|s| parse_start(s)).collect(),
            branch_limit: self.branch_limit,
            ticks: self.ticks,
        }
    }
}

fn parse_start(text: &str) -> StartSpec {
    let script = match text.parse::<Word>() {
        Ok(number) => ScriptRef::Number(number),
        Err(_) => ScriptRef::Name(text.to_string()),
    };
    StartSpec { script, args: Vec::new() }
}
