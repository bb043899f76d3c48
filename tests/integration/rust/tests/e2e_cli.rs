//! End-to-end runs through the CLI library surface.

use integration_tests::legacy_module;

use vm_cli::{FileHost, Runtime, Scenario};

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn a_scenario_file_drives_a_complete_run() {
    let dir = tempfile::tempdir().unwrap();
    let data = legacy_module(&[85, 3, 104, 89, 3, 105, 89, 86, 1], &[(1, 0, 0)], &[]);
    std::fs::write(dir.path().join("main.kar"), data).unwrap();
    let scenario_path = dir.path().join("run.json");
    std::fs::write(
        &scenario_path,
        r#"{ "modules": ["main.kar"], "starts": [{ "script": 1 }], "ticks": 5 }"#,
    )
    .unwrap();

    let scenario =
        Scenario::from_json(&std::fs::read_to_string(&scenario_path).unwrap()).unwrap();
    let buf = SharedBuf::default();
    let host = FileHost::new(dir.path()).with_output(Box::new(buf.clone()));
    let mut runtime = Runtime::new(host);
    runtime.apply(&scenario).unwrap();
    runtime.run(scenario.ticks);

    assert_eq!(*buf.0.borrow(), b"hi\n");
    assert_eq!(runtime.fault_count(), 0);
}

#[test]
fn scenario_branch_limits_contain_runaway_scripts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("loop.kar"),
        legacy_module(&[69], &[(1, 0, 0)], &[]),
    )
    .unwrap();

    let scenario = Scenario::from_json(
        r#"{ "modules": ["loop.kar"], "starts": [{ "script": 1 }], "branch_limit": 16, "ticks": 3 }"#,
    )
    .unwrap();
    let mut runtime = Runtime::new(FileHost::new(dir.path()));
    runtime.apply(&scenario).unwrap();
    runtime.run(scenario.ticks);

    assert_eq!(runtime.fault_count(), 1);
    assert_eq!(runtime.live_threads(), 0);
}
