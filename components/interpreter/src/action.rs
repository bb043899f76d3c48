//! Deferred script lifecycle requests.

use core_types::{Loader, Saver, ScopeId, ScriptName, SerialError, Word};

/// What a queued lifecycle request does once it reaches its map scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Start the named script unless it is already running; resume it when
    /// paused.
    Start,
    /// Start a fresh instance regardless of any running one.
    StartForced,
    /// Stop the named script's registered thread.
    Stop,
    /// Pause the named script's registered thread.
    Pause,
    /// Start every script of the given type.
    StartType(Word),
    /// Start a fresh instance of every script of the given type.
    StartTypeForced(Word),
}

impl ActionKind {
    fn to_words(&self) -> (Word, Word) {
        match *self {
            ActionKind::Start => (0, 0),
            ActionKind::StartForced => (1, 0),
            ActionKind::Stop => (2, 0),
            ActionKind::Pause => (3, 0),
            ActionKind::StartType(t) => (4, t),
            ActionKind::StartTypeForced(t) => (5, t),
        }
    }

    fn from_words(kind: Word, data: Word) -> Result<Self, SerialError> {
        Ok(match kind {
            0 => ActionKind::Start,
            1 => ActionKind::StartForced,
            2 => ActionKind::Stop,
            3 => ActionKind::Pause,
            4 => ActionKind::StartType(data),
            5 => ActionKind::StartTypeForced(data),
            _ => return Err(SerialError::Corrupt("action kind")),
        })
    }
}

/// One queued lifecycle request.
///
/// A request addressed to a scope other than the caller's own is queued at
/// the environment and delivered down the scope tree once every level of
/// its target triple is active. Requests whose target never activates stay
/// queued and survive serialization.
#[derive(Debug, Clone)]
pub struct ScriptAction {
    /// Target map scope triple.
    pub scope: ScopeId,
    /// Script the request addresses. Ignored by the start-by-type kinds.
    pub name: ScriptName,
    /// What to do on arrival.
    pub kind: ActionKind,
    /// Arguments for the start kinds.
    pub args: Vec<Word>,
}

impl ScriptAction {
    pub(crate) fn save_state(&self, out: &mut Saver) -> Result<(), SerialError> {
        out.put_word(self.scope.global)?;
        out.put_word(self.scope.hub)?;
        out.put_word(self.scope.map)?;
        match self.name {
            ScriptName::Num(n) => {
                out.put_byte(0)?;
                out.put_word(n)?;
            }
            ScriptName::Str(idx) => {
                out.put_byte(1)?;
                out.put_word(idx)?;
            }
        }
        let (kind, data) = self.kind.to_words();
        out.put_word(kind)?;
        out.put_word(data)?;
        out.put_vln(self.args.len() as u64)?;
        for &arg in &self.args {
            out.put_word(arg)?;
        }
        Ok(())
    }

    pub(crate) fn load_state(inp: &mut Loader) -> Result<Self, SerialError> {
        let scope = ScopeId::new(inp.get_word()?, inp.get_word()?, inp.get_word()?);
        let name = match inp.get_byte()? {
            0 => ScriptName::Num(inp.get_word()?),
            _ => ScriptName::Str(inp.get_word()?),
        };
        let kind = ActionKind::from_words(inp.get_word()?, inp.get_word()?)?;
        let count = inp.get_vln()? as usize;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(inp.get_word()?);
        }
        Ok(Self { scope, name, kind, args })
    }
}
