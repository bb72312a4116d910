//! Build and run capability for generated programs
//!
//! The marshaling core never spawns processes itself. It hands a
//! [`GeneratedProgram`] to a [`Toolchain`], which builds it into an
//! [`Artifact`] and runs that artifact to completion. Both calls block;
//! there is no timeout and no cancellation.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info};
use thiserror::Error;

use crate::backend::Target;
use crate::renderer::{GeneratedProgram, TemplateVars};

/// Errors reported by a toolchain
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// The program could not be started at all
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("build step `{command}` failed with status {status:?}:\n{stderr}")]
    BuildFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("generated program failed with status {status:?}:\n{stderr}")]
    RunFailed { status: Option<i32>, stderr: String },
}

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub target: Target,
    pub kernel_name: String,
    /// Directory the program was built in; run commands start here
    pub work_dir: PathBuf,
    pub host_file: PathBuf,
    pub kernel_file: Option<PathBuf>,
}

impl Artifact {
    /// Artifact describing `program` as laid out in `work_dir`
    pub fn for_program(program: &GeneratedProgram, work_dir: &Path) -> Self {
        Self {
            target: program.target,
            kernel_name: program.kernel_name.clone(),
            work_dir: work_dir.to_path_buf(),
            host_file: program.host_file().path.clone(),
            kernel_file: program.kernel_file().map(|f| f.path.clone()),
        }
    }

    fn vars(&self) -> TemplateVars {
        TemplateVars::new()
            .set("kernel", &self.kernel_name)
            .set("host_file", self.host_file.display())
            .set(
                "kernel_file",
                self.kernel_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            )
    }
}

/// Builds and runs generated programs
pub trait Toolchain {
    /// Toolchain name for logging
    fn name(&self) -> &str;

    /// Build the program whose files were written into `work_dir`
    fn build(&self, program: &GeneratedProgram, work_dir: &Path) -> Result<Artifact, ToolchainError>;

    /// Run the artifact to completion
    fn run(&self, artifact: &Artifact) -> Result<(), ToolchainError>;
}

/// One external command; arguments may use `{kernel}`, `{host_file}`
/// and `{kernel_file}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn render(&self, vars: &TemplateVars) -> CommandSpec {
        CommandSpec {
            program: vars.render(&self.program),
            args: self.args.iter().map(|a| vars.render(a)).collect(),
            envs: self.envs.clone(),
        }
    }

    fn output(&self, dir: &Path) -> Result<Output, ToolchainError> {
        debug!("Running command in {}: {}", dir.display(), self);
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .current_dir(dir)
            .output()
            .map_err(|source| ToolchainError::Launch {
                program: self.program.clone(),
                source,
            })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.envs {
            write!(f, "{k}={v} ")?;
        }
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// [`Toolchain`] driving external commands in the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToolchain {
    name: String,
    build_steps: Vec<CommandSpec>,
    run: CommandSpec,
}

impl CommandToolchain {
    pub fn new(name: impl Into<String>, run: CommandSpec) -> Self {
        Self {
            name: name.into(),
            build_steps: Vec::new(),
            run,
        }
    }

    pub fn with_build_step(mut self, step: CommandSpec) -> Self {
        self.build_steps.push(step);
        self
    }

    pub fn with_run(mut self, run: CommandSpec) -> Self {
        self.run = run;
        self
    }

    pub fn build_steps(&self) -> &[CommandSpec] {
        &self.build_steps
    }

    pub fn run_command(&self) -> &CommandSpec {
        &self.run
    }

    /// Default commands for the vendor flow of `target`
    pub fn for_target(target: Target) -> Self {
        match target {
            Target::HlsCsim => Self::new("g++ csim", CommandSpec::new("./csim")).with_build_step(
                CommandSpec::new("g++").args(["-std=c++11", "-O2", "{host_file}", "-o", "csim"]),
            ),
            Target::AwsHls => Self::new(
                "sdaccel rosetta",
                CommandSpec::new("./host")
                    .args(["-f", "{kernel}.xclbin"])
                    .env("XCL_EMULATION_MODE", "sw_emu"),
            )
            .with_build_step(CommandSpec::new("make").args(["TARGET=sw_emu", "KERNEL={kernel}"])),
            Target::Aocl => Self::new(
                "aocl emulator",
                CommandSpec::new("bin/host").env("CL_CONTEXT_EMULATOR_DEVICE_INTELFPGA", "1"),
            )
            .with_build_step(CommandSpec::new("aoc").args([
                "-march=emulator",
                "-v",
                "{kernel_file}",
                "-o",
                "bin/{kernel}.aocx",
            ]))
            .with_build_step(CommandSpec::new("make")),
            Target::Sdaccel => Self::new(
                "sdaccel",
                CommandSpec::new("./host").env("XCL_EMULATION_MODE", "sw_emu"),
            )
            .with_build_step(CommandSpec::new("xocc").args([
                "-c",
                "-t",
                "sw_emu",
                "-k",
                "{kernel}",
                "-o",
                "{kernel}.xo",
                "{kernel_file}",
            ]))
            .with_build_step(CommandSpec::new("xocc").args([
                "-l",
                "-t",
                "sw_emu",
                "-o",
                "{kernel}.xclbin",
                "{kernel}.xo",
            ]))
            .with_build_step(CommandSpec::new("g++").args([
                "-std=c++11",
                "{host_file}",
                "-o",
                "host",
                "-lOpenCL",
                "-lpthread",
            ])),
        }
    }

    /// Whether the first build program answers `--version`
    pub fn is_available(&self) -> bool {
        let program = match self.build_steps.first() {
            Some(step) => &step.program,
            None => &self.run.program,
        };
        let result = Command::new(program).arg("--version").output();
        match result {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

impl Toolchain for CommandToolchain {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, program: &GeneratedProgram, work_dir: &Path) -> Result<Artifact, ToolchainError> {
        let artifact = Artifact::for_program(program, work_dir);
        let vars = artifact.vars();
        for step in &self.build_steps {
            let step = step.render(&vars);
            let output = step.output(work_dir)?;
            if !output.status.success() {
                return Err(ToolchainError::BuildFailed {
                    command: step.to_string(),
                    status: output.status.code(),
                    stderr: stderr_of(&output),
                });
            }
        }
        Ok(artifact)
    }

    fn run(&self, artifact: &Artifact) -> Result<(), ToolchainError> {
        let run = self.run.render(&artifact.vars());
        let output = run.output(&artifact.work_dir)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            info!("{}: {}", self.name, stdout.trim_end());
        }
        if !output.status.success() {
            return Err(ToolchainError::RunFailed {
                status: output.status.code(),
                stderr: stderr_of(&output),
            });
        }
        Ok(())
    }
}
