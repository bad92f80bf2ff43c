use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use provision_saga::{ErrorKind, StepError};

use crate::Result;
use crate::traits::{RemoteRunner, ResourceProvisioner, ResultWriter};
use crate::types::{CommandOutput, ProvisioningResult, ResourceRecord, ResourceRef, ResourceRequest};

/// In-memory cloud: created resources get sequential ids and, for compute
/// resources, a private address under `10.0.0.0/24`.
#[derive(Default)]
pub struct MockProvisioner {
    calls: Mutex<Vec<String>>,
    existing: Mutex<HashMap<String, ResourceRecord>>,
    create_failures: HashMap<String, ErrorKind>,
    delete_failures: HashMap<String, ErrorKind>,
}

impl MockProvisioner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating a resource called `name` fails with `kind`.
    #[must_use]
    pub fn fail_create(mut self, name: &str, kind: ErrorKind) -> Self {
        self.create_failures.insert(name.to_string(), kind);
        self
    }

    #[must_use]
    pub fn fail_delete(mut self, name: &str, kind: ErrorKind) -> Self {
        self.delete_failures.insert(name.to_string(), kind);
        self
    }

    /// Pre-populate a resource so lookups find it.
    #[must_use]
    pub fn with_existing(self, name: &str, host: &str) -> Self {
        self.existing.lock().expect("existing mutex").insert(
            name.to_string(),
            ResourceRecord::new(format!("id-{name}")).with_attribute("host", host),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex").clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.existing.lock().expect("existing mutex").contains_key(name)
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls mutex").push(call);
    }
}

impl ResourceProvisioner for MockProvisioner {
    fn create(&self, request: &ResourceRequest) -> std::result::Result<ResourceRecord, StepError> {
        self.record(format!("create {}", request.name));
        if let Some(kind) = self.create_failures.get(&request.name) {
            return Err(StepError::new(*kind, format!("cannot create {}", request.name)));
        }

        let mut existing = self.existing.lock().expect("existing mutex");
        let mut record = ResourceRecord::new(format!("id-{}", request.name));
        if matches!(request.resource.as_str(), "instance" | "master" | "worker") {
            record = record.with_attribute("host", format!("10.0.0.{}", existing.len() + 10));
        }
        existing.insert(request.name.clone(), record.clone());
        Ok(record)
    }

    fn delete(&self, resource: &ResourceRef) -> std::result::Result<(), StepError> {
        self.record(format!("delete {}", resource.name));
        if let Some(kind) = self.delete_failures.get(&resource.name) {
            return Err(StepError::new(*kind, format!("cannot delete {}", resource.name)));
        }
        self.existing
            .lock()
            .expect("existing mutex")
            .remove(&resource.name);
        Ok(())
    }

    fn lookup(&self, resource: &ResourceRef) -> std::result::Result<Option<ResourceRecord>, StepError> {
        self.record(format!("lookup {}", resource.name));
        Ok(self
            .existing
            .lock()
            .expect("existing mutex")
            .get(&resource.name)
            .cloned())
    }
}

/// Remote runner answering by command substring; unmatched commands succeed.
#[derive(Default)]
pub struct MockRemoteRunner {
    calls: Mutex<Vec<(String, String)>>,
    responses: Vec<(String, i32, String)>,
    unreachable: Vec<String>,
    failing: Vec<(String, String, i32)>,
}

impl MockRemoteRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with `code` and print `stdout`.
    #[must_use]
    pub fn respond(mut self, pattern: &str, code: i32, stdout: &str) -> Self {
        self.responses
            .push((pattern.to_string(), code, stdout.to_string()));
        self
    }

    /// Commands containing `pattern` exit with `code`, but only on `host`.
    #[must_use]
    pub fn fail_on(mut self, host: &str, pattern: &str, code: i32) -> Self {
        self.failing
            .push((host.to_string(), pattern.to_string(), code));
        self
    }

    #[must_use]
    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.push(host.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls mutex").clone()
    }

    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, command)| command)
            .collect()
    }
}

impl RemoteRunner for MockRemoteRunner {
    fn execute(
        &self,
        host: &str,
        command: &str,
        _timeout: Duration,
    ) -> std::result::Result<CommandOutput, StepError> {
        self.calls
            .lock()
            .expect("calls mutex")
            .push((host.to_string(), command.to_string()));

        if self.unreachable.iter().any(|h| h == host) {
            return Err(StepError::transient(format!("{host} is unreachable")));
        }
        if let Some((_, _, code)) = self
            .failing
            .iter()
            .find(|(h, pattern, _)| h == host && command.contains(pattern.as_str()))
        {
            return Ok(CommandOutput {
                stderr: format!("command failed on {host}"),
                exit_code: Some(*code),
                ..CommandOutput::default()
            });
        }
        let (code, stdout) = self
            .responses
            .iter()
            .find(|(pattern, _, _)| command.contains(pattern.as_str()))
            .map_or((0, String::new()), |(_, code, stdout)| (*code, stdout.clone()));
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: Some(code),
        })
    }
}

#[derive(Default)]
pub struct MockResultWriter {
    written: Mutex<Vec<ProvisioningResult>>,
}

impl MockResultWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<ProvisioningResult> {
        self.written.lock().expect("written mutex").last().cloned()
    }
}

impl ResultWriter for MockResultWriter {
    fn write(&self, result: &ProvisioningResult) -> Result<()> {
        self.written
            .lock()
            .expect("written mutex")
            .push(result.clone());
        Ok(())
    }
}
