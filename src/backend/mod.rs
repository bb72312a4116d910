//! Target toolchains
//!
//! Each [`Target`] owns a fixed host template (one submodule per target)
//! and default build/run commands. The toolchain itself is reached only
//! through the [`Toolchain`] trait.

mod aocl;
mod aws_hls;
mod hls_csim;
mod sdaccel;
pub mod toolchain;

pub use toolchain::{Artifact, CommandSpec, CommandToolchain, Toolchain, ToolchainError};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::renderer::HostTemplate;

/// Host program flavor and toolchain family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// C simulation harness with the kernel compiled into the host
    HlsCsim,
    /// Rosetta harness on AWS F1 / SDAccel
    AwsHls,
    /// Intel FPGA SDK for OpenCL emulator
    Aocl,
    /// Xilinx OpenCL C++ bindings
    Sdaccel,
}

impl Target {
    pub const ALL: [Target; 4] = [Target::HlsCsim, Target::AwsHls, Target::Aocl, Target::Sdaccel];

    pub fn name(&self) -> &'static str {
        match self {
            Target::HlsCsim => "hls_csim",
            Target::AwsHls => "aws_hls",
            Target::Aocl => "aocl",
            Target::Sdaccel => "sdaccel",
        }
    }

    pub fn template(&self) -> &'static HostTemplate {
        match self {
            Target::HlsCsim => &hls_csim::TEMPLATE,
            Target::AwsHls => &aws_hls::TEMPLATE,
            Target::Aocl => &aocl::TEMPLATE,
            Target::Sdaccel => &sdaccel::TEMPLATE,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown target '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("hls_csim", Target::HlsCsim)]
    #[case("AWS_HLS", Target::AwsHls)]
    #[case("aocl", Target::Aocl)]
    #[case("sdaccel", Target::Sdaccel)]
    fn test_parse_target(#[case] name: &str, #[case] expected: Target) {
        assert_eq!(name.parse::<Target>(), Ok(expected));
    }

    #[test]
    fn test_unknown_target() {
        assert!("vivado".parse::<Target>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        for target in Target::ALL {
            let json = serde_json::to_string(&target).unwrap();
            assert_eq!(json, format!("\"{target}\""));
        }
    }

    #[test]
    fn test_host_file_names() {
        assert_eq!(Target::AwsHls.template().host_file, "host.cpp");
        assert_eq!(Target::Aocl.template().host_file, "main.cpp");
        assert_eq!(Target::Aocl.template().kernel_file, Some("device/{kernel}.cl"));
        assert!(Target::HlsCsim.template().embed_kernel);
        assert_eq!(Target::HlsCsim.template().kernel_file, None);
    }
}
