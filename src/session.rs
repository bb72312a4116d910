//! Marshaling sessions
//!
//! One session takes one argument list end to end: regions are acquired
//! and populated, the host program is assembled and written out, the
//! toolchain builds and runs it, results are read back and every region
//! is released. Release happens on every path, including failures of the
//! toolchain and of the session itself.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::TempDir;

use crate::args::{ArgDescriptor, KernelArg, KernelSignature};
use crate::backend::{Target, Toolchain};
use crate::config::SessionConfig;
use crate::error::{MarshalError, Result};
use crate::layout::Layout;
use crate::renderer::{GeneratedProgram, HostProgramAssembler};
use crate::shm::{RegionBackend, RegionStats, SessionId, SharedRegion, SharedRegionManager};

/// Outcome of a successful session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: SessionId,
    pub program: GeneratedProgram,
    /// Layout of every argument, by position
    pub layouts: Vec<Layout>,
    /// Regions used, by position; `None` for scalars
    pub regions: Vec<Option<SharedRegion>>,
    pub stats: RegionStats,
    /// Directory holding the generated files, if it still exists
    pub work_dir: Option<PathBuf>,
}

enum WorkDir {
    Fixed(PathBuf),
    Temp(TempDir),
}

impl WorkDir {
    fn create(config: &SessionConfig) -> Result<Self> {
        match &config.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Ok(WorkDir::Fixed(dir.clone()))
            }
            None => Ok(WorkDir::Temp(
                tempfile::Builder::new().prefix("accel-bridge-").tempdir()?,
            )),
        }
    }

    fn path(&self) -> &Path {
        match self {
            WorkDir::Fixed(dir) => dir,
            WorkDir::Temp(dir) => dir.path(),
        }
    }

    /// Path that survives the session, if any
    fn finish(self, keep: bool) -> Option<PathBuf> {
        match self {
            WorkDir::Fixed(dir) => Some(dir),
            WorkDir::Temp(dir) if keep => Some(dir.keep()),
            WorkDir::Temp(_) => None,
        }
    }
}

/// Drives marshaling sessions for one target
pub struct MarshalSession<B: RegionBackend, T: Toolchain> {
    target: Target,
    backend: B,
    toolchain: T,
    config: SessionConfig,
}

impl<B: RegionBackend, T: Toolchain> MarshalSession<B, T> {
    pub fn new(target: Target, backend: B, toolchain: T) -> Self {
        Self {
            target,
            backend,
            toolchain,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Marshal `args` into a generated program, run it and copy results back
    ///
    /// On success every tensor buffer holds what the external program left
    /// in its region. On failure the buffers are untouched. Either way all
    /// acquired regions are released before returning.
    pub fn run(
        &mut self,
        signature: &KernelSignature,
        args: &mut [KernelArg<'_>],
        kernel_body: &str,
    ) -> Result<SessionReport> {
        signature.check_arity(args.len())?;
        let descriptors = args
            .iter()
            .enumerate()
            .map(|(i, arg)| arg.describe(i))
            .collect::<Result<Vec<_>>>()?;

        let session = SessionId::next();
        let mut manager = SharedRegionManager::new(&mut self.backend, self.config.key_policy, session);
        manager.acquire_all(&descriptors)?;
        let regions: Vec<Option<SharedRegion>> = (0..descriptors.len())
            .map(|i| manager.region(i).cloned())
            .collect();

        let outcome = drive(
            &mut manager,
            &self.toolchain,
            &self.config,
            self.target,
            signature,
            args,
            &descriptors,
            kernel_body,
        );

        let failures = manager.release_all();
        if failures > 0 {
            warn!("{failures} region(s) could not be released cleanly");
        }
        let stats = manager.stats();
        debug!(
            "Session {:#x}: {} acquired, {} released",
            session.token(),
            stats.acquired,
            stats.released
        );

        let (program, work_dir) = outcome?;
        Ok(SessionReport {
            session,
            program,
            layouts: descriptors.into_iter().map(|d| d.layout).collect(),
            regions,
            stats,
            work_dir,
        })
    }
}

/// Everything between acquisition and release
#[allow(clippy::too_many_arguments)]
fn drive<B: RegionBackend, T: Toolchain>(
    manager: &mut SharedRegionManager<B>,
    toolchain: &T,
    config: &SessionConfig,
    target: Target,
    signature: &KernelSignature,
    args: &mut [KernelArg<'_>],
    descriptors: &[ArgDescriptor],
    kernel_body: &str,
) -> Result<(GeneratedProgram, Option<PathBuf>)> {
    for (i, arg) in args.iter().enumerate() {
        if let KernelArg::Tensor(t) = arg {
            manager.populate(i, &t.data[..])?;
        }
    }

    info!("Creating host program");
    let mut assembler = HostProgramAssembler::new(config.indent);
    if let Some(name) = &config.host_file {
        assembler = assembler.with_host_file(name);
    }
    let program = assembler.assemble(
        signature,
        descriptors,
        &manager.region_ids(),
        kernel_body,
        target,
    )?;

    let work_dir = WorkDir::create(config)?;
    program.write_to(work_dir.path())?;

    info!("Compiling");
    let artifact = toolchain
        .build(&program, work_dir.path())
        .map_err(MarshalError::from)?;
    info!("Running simulation");
    toolchain.run(&artifact).map_err(MarshalError::from)?;
    info!("Finished simulation");

    // every region is read before any caller buffer is overwritten
    let mut results = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        if let KernelArg::Tensor(t) = arg {
            let size = manager.region(i).map_or(t.data.len(), |r| r.byte_size);
            let mut scratch = vec![0u8; size];
            manager.read_back(i, &mut scratch)?;
            results.push((i, scratch));
        }
    }
    for (i, scratch) in results {
        if let KernelArg::Tensor(t) = &mut args[i] {
            t.data[..scratch.len()].copy_from_slice(&scratch);
        }
    }
    Ok((program, work_dir.finish(config.keep_artifacts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ScalarArgument, ScalarValue, TensorArgument};
    use crate::backend::{Artifact, ToolchainError};
    use crate::dtype::ElementType;
    use crate::shm::MemoryBackend;

    /// Toolchain that plays the external program against the memory backend
    struct Doubler {
        backend: MemoryBackend,
    }

    impl Toolchain for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn build(&self, program: &GeneratedProgram, work_dir: &Path) -> std::result::Result<Artifact, ToolchainError> {
            assert!(work_dir.join(&program.host_file().path).exists());
            Ok(Artifact::for_program(program, work_dir))
        }

        fn run(&self, _artifact: &Artifact) -> std::result::Result<(), ToolchainError> {
            for id in self.backend.ids() {
                let data = self.backend.contents(id).unwrap();
                let doubled: Vec<u8> = data.iter().map(|b| b.wrapping_mul(2)).collect();
                self.backend.overwrite(id, &doubled).unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn test_results_are_read_back() {
        let backend = MemoryBackend::new();
        let toolchain = Doubler {
            backend: backend.clone(),
        };
        let mut session = MarshalSession::new(Target::Aocl, backend.clone(), toolchain);

        let mut data = vec![1u8, 2, 3, 4];
        let mut args = vec![
            KernelArg::Tensor(TensorArgument::new(vec![2, 2], ElementType::uint(8), &mut data)),
            KernelArg::Scalar(ScalarArgument::new(ElementType::int(32), ScalarValue::Int(4))),
        ];
        let report = session
            .run(&KernelSignature::new("double", 2), &mut args, "")
            .unwrap();
        drop(args);

        assert_eq!(data, vec![2, 4, 6, 8]);
        assert_eq!(report.stats.acquired, 1);
        assert_eq!(report.stats.live(), 0);
        assert!(report.regions[1].is_none());
        assert!(report.work_dir.is_none());
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn test_arity_mismatch_acquires_nothing() {
        let backend = MemoryBackend::new();
        let toolchain = Doubler {
            backend: backend.clone(),
        };
        let mut session = MarshalSession::new(Target::Sdaccel, backend.clone(), toolchain);
        let mut data = vec![0u8; 4];
        let mut args = vec![KernelArg::Tensor(TensorArgument::new(
            vec![4],
            ElementType::uint(8),
            &mut data,
        ))];
        let err = session
            .run(&KernelSignature::new("k", 2), &mut args, "")
            .unwrap_err();
        assert!(matches!(err, MarshalError::ArgumentCountMismatch { .. }));
        assert_eq!(backend.created(), 0);
    }
}
