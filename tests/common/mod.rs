//! Common test utilities for marshaling integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::Path;

use accel_bridge::backend::{Artifact, Toolchain, ToolchainError};
use accel_bridge::renderer::GeneratedProgram;
use accel_bridge::shm::{MemoryBackend, RegionBackend};

pub fn setup_logger() {
    // Initialize the logger for tests, ignoring errors if it's already set up
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Which step of the mock toolchain fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    None,
    Build,
    Run,
}

/// Toolchain standing in for a vendor flow
///
/// On `run` it plays the external program: every live region of the
/// shared memory backend is passed through `transform`.
pub struct MockToolchain {
    backend: MemoryBackend,
    failure: Failure,
    transform: fn(u8) -> u8,
    lose_last_region: bool,
    pub calls: RefCell<Vec<&'static str>>,
    pub host_sources: RefCell<Vec<String>>,
}

impl MockToolchain {
    pub fn new(backend: &MemoryBackend) -> Self {
        Self {
            backend: backend.clone(),
            failure: Failure::None,
            transform: |b| b,
            lose_last_region: false,
            calls: RefCell::new(Vec::new()),
            host_sources: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = failure;
        self
    }

    /// Remove the newest region behind the manager's back during `run`
    pub fn losing_last_region(mut self) -> Self {
        self.lose_last_region = true;
        self
    }

    pub fn with_transform(mut self, transform: fn(u8) -> u8) -> Self {
        self.transform = transform;
        self
    }
}

impl Toolchain for MockToolchain {
    fn name(&self) -> &str {
        "mock"
    }

    fn build(&self, program: &GeneratedProgram, work_dir: &Path) -> Result<Artifact, ToolchainError> {
        self.calls.borrow_mut().push("build");
        let host = std::fs::read_to_string(work_dir.join(&program.host_file().path))
            .expect("host source written before build");
        self.host_sources.borrow_mut().push(host);
        if self.failure == Failure::Build {
            return Err(ToolchainError::BuildFailed {
                command: "mock-cc".to_string(),
                status: Some(2),
                stderr: "syntax error".to_string(),
            });
        }
        Ok(Artifact::for_program(program, work_dir))
    }

    fn run(&self, _artifact: &Artifact) -> Result<(), ToolchainError> {
        self.calls.borrow_mut().push("run");
        for id in self.backend.ids() {
            let data = self.backend.contents(id).expect("live region");
            let out: Vec<u8> = data.into_iter().map(self.transform).collect();
            self.backend.overwrite(id, &out).expect("same size");
        }
        if self.lose_last_region {
            if let Some(id) = self.backend.ids().last().copied() {
                self.backend.clone().destroy(id).expect("live region");
            }
        }
        if self.failure == Failure::Run {
            return Err(ToolchainError::RunFailed {
                status: Some(1),
                stderr: "simulation aborted".to_string(),
            });
        }
        Ok(())
    }
}
