//! The embedding wrapper the binary drives.

use crate::error::{HostError, HostResult};
use crate::host::FileHost;
use crate::scenario::{Scenario, ScriptRef, StartSpec};

use core_types::{ModuleName, ScopeId, ScriptName};
use interpreter::{ActionKind, Environment, ScriptAction};

/// One VM instance wired to a [`FileHost`].
///
/// The CLI runs everything in a single map scope; the full scope tree
/// only matters to embeddings with several concurrently loaded maps.
pub struct Runtime {
    env: Environment,
    host: FileHost,
    scope: ScopeId,
}

impl Runtime {
    /// Creates a runtime around a host.
    pub fn new(host: FileHost) -> Self {
        Self {
            env: Environment::new(),
            host,
            scope: ScopeId::new(0, 0, 0),
        }
    }

    /// Loads and links a scenario's modules, then queues its starts.
    pub fn apply(&mut self, scenario: &Scenario) -> HostResult<()> {
        self.env.branch_limit = scenario.branch_limit;

        let mut handles = Vec::with_capacity(scenario.modules.len());
        for module in &scenario.modules {
            let name = ModuleName::from_str(module.clone());
            handles.push(self.env.load_module(&mut self.host, &name)?);
        }

        self.env.global_scope(self.scope.global).active = true;
        self.env
            .global_scope(self.scope.global)
            .hub_scope(self.scope.hub)
            .active = true;
        self.env.link_modules(self.scope, &handles);
        self.env.map_scope(self.scope).active = true;

        for start in &scenario.starts {
            self.start(start)?;
        }
        Ok(())
    }

    /// Queues one script start for the next tick.
    pub fn start(&mut self, spec: &StartSpec) -> HostResult<()> {
        let name = match &spec.script {
            ScriptRef::Number(n) => ScriptName::Num(*n),
            ScriptRef::Name(s) => ScriptName::Str(self.env.strings.intern(s.as_bytes())),
        };
        if self.env.map_scope(self.scope).find_script(name).is_none() {
            let shown = match &spec.script {
                ScriptRef::Number(n) => n.to_string(),
                ScriptRef::Name(s) => s.clone(),
            };
            return Err(HostError::UnknownScript(shown));
        }
        self.env.defer_action(ScriptAction {
            scope: self.scope,
            name,
            kind: ActionKind::Start,
            args: spec.args.clone(),
        });
        Ok(())
    }

    /// Runs one tick.
    pub fn tick(&mut self) {
        self.env.exec(&mut self.host);
    }

    /// Runs up to `ticks` ticks, stopping once no threads remain.
    /// Returns the number of ticks actually run.
    pub fn run(&mut self, ticks: u32) -> u32 {
        for tick in 0..ticks {
            self.tick();
            if self.live_threads() == 0 {
                return tick + 1;
            }
        }
        ticks
    }

    /// Live threads in the runtime's map scope.
    pub fn live_threads(&self) -> usize {
        self.env
            .find_global(self.scope.global)
            .and_then(|g| g.find_hub(self.scope.hub))
            .and_then(|h| h.find_map(self.scope.map))
            .map(|m| m.threads().len())
            .unwrap_or(0)
    }

    /// Faults reported so far.
    pub fn fault_count(&self) -> u32 {
        self.host.fault_count()
    }

    /// Writes the complete VM state to a file.
    pub fn save_state(&self, path: &std::path::Path) -> HostResult<()> {
        let mut file = std::fs::File::create(path)?;
        self.env.save_state(&mut file, true)?;
        Ok(())
    }

    /// Replaces the VM state from a file, reloading modules through the
    /// host.
    pub fn load_state(&mut self, path: &std::path::Path) -> HostResult<()> {
        let mut file = std::fs::File::open(path)?;
        self.env.load_state(&mut file, &mut self.host)?;
        Ok(())
    }

    /// The wrapped environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Mutable access for embeddings layering on extra natives or
    /// configuration.
    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }
}
