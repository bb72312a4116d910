//! accel-bridge: tensor argument marshaling for FPGA host programs
//!
//! Given a typed argument list from a compiler's argument binder, this crate
//! classifies each element type into native storage, computes byte layouts
//! and strides, moves tensor data through one OS shared-memory segment per
//! tensor, and emits a host program that rebuilds the tensors on the other
//! side of the process boundary with bit-exact fixed-point semantics.
//!
//! # Architecture
//!
//! - **dtype**: element types and their native storage buckets
//! - **layout**: byte sizes and row-major stride tables
//! - **args**: tensor and scalar arguments, kernel signatures
//! - **shm**: shared regions and their OS backends
//! - **renderer**: copy loop nests, templates and host program assembly
//! - **backend**: targets, per-target templates and toolchains
//! - **session**: one marshaling session end to end
//!
//! # Example
//!
//! ```no_run
//! use accel_bridge::prelude::*;
//!
//! # fn main() -> accel_bridge::Result<()> {
//! let mut data = vec![0u8; 12];
//! let mut args = vec![KernelArg::Tensor(TensorArgument::new(
//!     vec![4, 3],
//!     ElementType::uint(8),
//!     &mut data,
//! ))];
//! let mut session = MarshalSession::new(
//!     Target::Aocl,
//!     SysVBackend::new(),
//!     CommandToolchain::for_target(Target::Aocl),
//! )
//! .with_config(SessionConfig::from_env());
//! let report = session.run(&KernelSignature::new("default_function", 1), &mut args, "")?;
//! println!("{}", report.program.host_source());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod args;
pub mod backend;
pub mod config;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod renderer;
pub mod session;
pub mod shm;

// ============================================================================
// Re-exports
// ============================================================================

pub use args::{
    ArgDescriptor, ArgumentSpec, KernelArg, KernelDescription, KernelSignature, ScalarArgument,
    ScalarValue, TensorArgument,
};
pub use backend::{CommandToolchain, Target, Toolchain, ToolchainError};
pub use config::SessionConfig;
pub use dtype::{ElementKind, ElementType, NativeRepr, RawDataType, classify, classify_raw};
pub use error::{MarshalError, Result};
pub use layout::Layout;
pub use renderer::{GeneratedProgram, HostProgramAssembler, IndexEmitter};
pub use session::{MarshalSession, SessionReport};
pub use shm::{KeyPolicy, MemoryBackend, RegionBackend, SharedRegionManager};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::args::{KernelArg, KernelSignature, ScalarArgument, ScalarValue, TensorArgument};
    pub use crate::backend::{CommandToolchain, Target, Toolchain};
    pub use crate::config::SessionConfig;
    pub use crate::dtype::{ElementKind, ElementType};
    pub use crate::session::MarshalSession;
    pub use crate::shm::{KeyPolicy, MemoryBackend};

    #[cfg(unix)]
    pub use crate::shm::SysVBackend;
}
