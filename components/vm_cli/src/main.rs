//! Karst scripting VM CLI.
//!
//! Loads module files, starts scripts, runs ticks, and optionally saves
//! or restores the whole VM state.

use clap::Parser;
use vm_cli::{Cli, FileHost, HostResult, Runtime, Scenario};

use std::path::PathBuf;

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(faults) if faults > 0 => {
            eprintln!("{faults} script fault(s) reported");
            std::process::exit(2);
        }
        Ok(_) => {}
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> HostResult<u32> {
    let root = cli.dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut runtime = Runtime::new(FileHost::new(root));

    let ticks = if let Some(path) = &cli.load_state {
        runtime.load_state(path)?;
        cli.ticks
    } else {
        let scenario = match &cli.scenario {
            Some(path) => Scenario::from_json(&std::fs::read_to_string(path)?)?,
            None => cli.to_scenario(),
        };
        runtime.apply(&scenario)?;
        scenario.ticks
    };

    runtime.run(ticks);

    if let Some(path) = &cli.save_state {
        runtime.save_state(path)?;
    }
    Ok(runtime.fault_count())
}
