//! The file-backed host behind the CLI.

use core_types::{KillType, LoadError, ModuleName, Word};
use interpreter::HostContext;

use log::warn;

use std::io::Write;
use std::path::{Path, PathBuf};

/// Host that maps module names to files under a root directory and
/// writes finished print buffers to a sink.
///
/// Faults are logged and counted so the binary can reflect them in its
/// exit status.
pub struct FileHost {
    root: PathBuf,
    out: Box<dyn Write>,
    fault_count: u32,
}

impl FileHost {
    /// Creates a host reading modules relative to `root` and printing to
    /// stdout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            out: Box::new(std::io::stdout()),
            fault_count: 0,
        }
    }

    /// Redirects script print output.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Faults reported since construction.
    pub fn fault_count(&self) -> u32 {
        self.fault_count
    }

    fn module_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl HostContext for FileHost {
    fn fetch_module(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError> {
        let path = self.module_path(&name.name);
        std::fs::read(&path).map_err(|_| LoadError::ModuleNotFound(name.name.clone()))
    }

    fn report_fault(&mut self, kind: KillType, data: Word, code_idx: Word) {
        self.fault_count += 1;
        warn!("script fault {kind:?} (data {data}) at code index {code_idx}");
    }

    fn print_end(&mut self, text: &[u8]) {
        let _ = self.out.write_all(text);
        let _ = self.out.write_all(b"\n");
        let _ = self.out.flush();
    }
}
