#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use provision_operations::ProvisioningOrchestrator;
use provision_operations::providers::{HookProvisioner, JsonResultWriter};
use provision_operations::steps::ProvisionDeps;
use provision_operations::traits::RemoteRunner;
use provision_operations::types::{CommandOutput, parse_key_values};
use provision_saga::{FileMarkerGuard, InMemoryGuard, StepError};
use tempfile::TempDir;

const RESOURCES: [&str; 5] = ["subnet", "security-group", "iam-role", "instance", "bucket"];

/// A cloud simulated by hook scripts that keep one file per live resource.
pub struct FakeCloud {
    dir: TempDir,
}

impl FakeCloud {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let state = dir.path().join("state");
        fs::create_dir_all(state.join("resources")).expect("create state dir");
        let hooks = dir.path().join("hooks").join("aws");
        fs::create_dir_all(&hooks).expect("create hooks dir");

        let script = dir.path().join("fake-cloud.sh");
        fs::write(&script, fake_cloud_script(&state)).expect("write hook script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod hook script");
        for verb in ["create", "delete", "lookup"] {
            for resource in RESOURCES {
                symlink(&script, hooks.join(format!("{verb}-{resource}"))).expect("link hook");
            }
        }

        Self { dir }
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.dir.path().join("hooks")
    }

    pub fn marker_dir(&self) -> PathBuf {
        self.dir.path().join("markers")
    }

    pub fn result_file(&self) -> PathBuf {
        self.dir.path().join("provision-result.json")
    }

    fn state(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Make the next `verb` of resource `name` exit with `code`.
    pub fn fail(&self, verb: &str, name: &str, code: i32) {
        fs::write(self.state().join(format!("fail-{verb}-{name}")), code.to_string())
            .expect("write failure trigger");
    }

    /// Pretend `name` was created by an earlier run.
    pub fn seed(&self, name: &str, id: &str) {
        fs::write(self.state().join("resources").join(name), format!("id={id}\n"))
            .expect("seed resource");
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state().join("resources").join(name).exists()
    }

    pub fn host_of(&self, name: &str) -> String {
        let content = fs::read_to_string(self.state().join("resources").join(name))
            .expect("resource exists");
        parse_key_values(&content)
            .shift_remove("host")
            .expect("resource has a host")
    }

    /// Every hook invocation as `"<verb> <name>"`, in order.
    pub fn log(&self) -> Vec<String> {
        fs::read_to_string(self.state().join("log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn result_json(&self) -> serde_json::Value {
        let content = fs::read_to_string(self.result_file()).expect("result file written");
        serde_json::from_str(&content).expect("result file is json")
    }

    pub fn orchestrator(&self, runner: Arc<RecordingRunner>) -> ProvisioningOrchestrator {
        let timeout = Duration::from_secs(10);
        let deps = ProvisionDeps::new(
            Arc::new(HookProvisioner::new(self.hooks_dir(), timeout)),
            runner,
            Arc::new(FileMarkerGuard::new(self.marker_dir())),
        );
        ProvisioningOrchestrator::new(
            deps,
            Arc::new(InMemoryGuard::new()),
            Arc::new(JsonResultWriter::new(self.result_file())),
        )
        .with_step_timeout(timeout)
    }
}

fn fake_cloud_script(state: &Path) -> String {
    format!(
        r#"#!/bin/sh
state="{state}"
verb=$(basename "$0" | cut -d- -f1)
echo "$verb $PROVISION_NAME" >> "$state/log"
if [ -f "$state/fail-$verb-$PROVISION_NAME" ]; then
  echo "injected $verb failure" >&2
  exit "$(cat "$state/fail-$verb-$PROVISION_NAME")"
fi
res="$state/resources/$PROVISION_NAME"
case "$verb" in
  create)
    n=$(ls "$state/resources" | wc -l)
    echo "id=$PROVISION_RESOURCE-$PROVISION_NAME" > "$res"
    if [ "$PROVISION_RESOURCE" = instance ]; then
      echo "host=10.1.0.$((n + 10))" >> "$res"
    fi
    cat "$res"
    ;;
  delete)
    rm -f "$res"
    ;;
  lookup)
    [ -f "$res" ] || exit 3
    cat "$res"
    ;;
esac
"#,
        state = state.display()
    )
}

/// Remote runner that records commands and succeeds unless told otherwise.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<(String, String)>>,
    failures: Vec<(String, String, i32)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands on `host` containing `pattern` exit with `code`.
    pub fn fail_on(mut self, host: &str, pattern: &str, code: i32) -> Self {
        self.failures
            .push((host.to_string(), pattern.to_string(), code));
        self
    }

    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls mutex")
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, command)| command.clone())
            .collect()
    }
}

impl RemoteRunner for RecordingRunner {
    fn execute(
        &self,
        host: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, StepError> {
        self.calls
            .lock()
            .expect("calls mutex")
            .push((host.to_string(), command.to_string()));
        let code = self
            .failures
            .iter()
            .find(|(h, pattern, _)| h == host && command.contains(pattern.as_str()))
            .map_or(0, |(_, _, code)| *code);
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                format!("E: command failed on {host}")
            },
            exit_code: Some(code),
        })
    }
}
