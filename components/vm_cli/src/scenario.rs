//! JSON scenario descriptions: which modules to load, which scripts to
//! start with what arguments, and how long to run.

use core_types::Word;

use serde::Deserialize;

/// A script referenced from a scenario, by number or by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptRef {
    /// Numbered script.
    Number(Word),
    /// String-named script.
    Name(String),
}

/// One start request.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSpec {
    /// Script to start.
    pub script: ScriptRef,
    /// Start arguments.
    #[serde(default)]
    pub args: Vec<Word>,
}

/// A complete run description.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Module files to load and link, first entry first.
    pub modules: Vec<String>,
    /// Scripts to start before the first tick.
    #[serde(default)]
    pub starts: Vec<StartSpec>,
    /// Branch budget per instruction slice; zero is unlimited.
    #[serde(default)]
    pub branch_limit: Word,
    /// Ticks to run. The run ends early once no threads remain.
    #[serde(default = "default_ticks")]
    pub ticks: u32,
}

fn default_ticks() -> u32 {
    100
}

impl Scenario {
    /// Parses a scenario from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_parse_by_number_or_name() {
        let scenario = Scenario::from_json(
            r#"{
                "modules": ["main.kar"],
                "starts": [
                    { "script": 1, "args": [4] },
                    { "script": "open_doors" }
                ],
                "branch_limit": 500000
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.modules, vec!["main.kar"]);
        assert_eq!(scenario.ticks, 100);
        assert!(matches!(scenario.starts[0].script, ScriptRef::Number(1)));
        assert_eq!(scenario.starts[0].args, vec![4]);
        assert!(matches!(scenario.starts[1].script, ScriptRef::Name(ref n) if n == "open_doors"));
        assert!(scenario.starts[1].args.is_empty());
    }

    #[test]
    fn malformed_scenarios_are_rejected() {
        assert!(Scenario::from_json("{\"starts\": []}").is_err());
    }
}
