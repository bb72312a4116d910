//! accel-bridge: inspect kernel argument layouts and generated host programs
//!
//! Usage:
//!   accel-bridge layout <INPUT>
//!   accel-bridge emit <INPUT> [-t TARGET] [--body FILE] [-o DIR]
//!
//! INPUT is a JSON kernel description (use '-' for stdin):
//!   {"kernel": "vadd", "args": [{"arg": "tensor", "shape": [4, 3],
//!    "dtype": {"kind": "uint", "bits": 8}}], "body": "..."}
//!
//! No toolchain is ever launched. Region ids in emitted programs come from
//! an in-process backend.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;

use accel_bridge::args::{ArgRole, KernelDescription};
use accel_bridge::shm::{KeyPolicy, MemoryBackend, SessionId, SharedRegionManager};
use accel_bridge::{HostProgramAssembler, Target};

#[derive(Parser)]
#[command(name = "accel-bridge")]
#[command(about = "Tensor marshaling layouts and FPGA host program generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layout of every argument
    Layout {
        /// Kernel description (use '-' for stdin)
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Assemble the host program for a target
    Emit {
        /// Kernel description (use '-' for stdin)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// hls_csim, aws_hls, aocl or sdaccel
        #[arg(short, long, default_value = "aocl")]
        target: Target,

        /// Kernel body text, replacing the description's body
        #[arg(long, value_name = "FILE")]
        body: Option<PathBuf>,

        /// Write all generated files into this directory instead of
        /// printing the host source
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Spaces per indentation level
        #[arg(long, default_value_t = 2)]
        indent: usize,

        /// positional or session
        #[arg(long, default_value = "session")]
        key_policy: KeyPolicy,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Read a kernel description from a file or stdin
fn read_description(input: &Path) -> Result<KernelDescription, Box<dyn std::error::Error>> {
    let source = if input.to_str() == Some("-") {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source)?;
        source
    } else {
        fs::read_to_string(input)?
    };
    Ok(KernelDescription::from_json(&source)?)
}

fn write_stdout(content: &str) -> Result<(), Box<dyn std::error::Error>> {
    if io::stdout().is_terminal() {
        println!("{}", content.trim_end());
    } else {
        print!("{}", content);
        io::stdout().flush()?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Layout { input } => {
            let desc = read_description(&input)?;
            write_stdout(&layout_table(&desc)?)
        }
        Commands::Emit {
            input,
            target,
            body,
            output,
            indent,
            key_policy,
        } => {
            let mut desc = read_description(&input)?;
            if let Some(path) = body {
                desc.body = fs::read_to_string(path)?;
            }
            emit(&desc, target, output, indent, key_policy)
        }
    }
}

fn layout_table(desc: &KernelDescription) -> Result<String, Box<dyn std::error::Error>> {
    let mut out = format!("kernel {} ({} arguments)\n", desc.kernel, desc.args.len());
    out.push_str("idx  role    dtype         native    shape         bytes  strides\n");
    for arg in desc.describe()? {
        let role = match arg.role {
            ArgRole::Tensor => "tensor",
            ArgRole::Scalar(_) => "scalar",
        };
        out.push_str(&format!(
            "{:<4} {:<7} {:<13} {:<9} {:<13} {:<6} {:?}\n",
            arg.index,
            role,
            arg.dtype.to_string(),
            arg.layout.native().to_string(),
            format!("{:?}", arg.layout.shape()),
            arg.layout.byte_size(),
            arg.layout.strides()
        ));
    }
    Ok(out)
}

fn emit(
    desc: &KernelDescription,
    target: Target,
    output: Option<PathBuf>,
    indent: usize,
    key_policy: KeyPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let args = desc.describe()?;
    let mut regions = SharedRegionManager::new(MemoryBackend::new(), key_policy, SessionId::next());
    regions.acquire_all(&args)?;

    let program = HostProgramAssembler::new(indent).assemble(
        &desc.signature(),
        &args,
        &regions.region_ids(),
        &desc.body,
        target,
    )?;
    regions.release_all();

    match output {
        Some(dir) => {
            let written = program.write_to(&dir)?;
            info!("Wrote {} file(s) to {}", written.len(), dir.display());
            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }
        None => write_stdout(program.host_source()),
    }
}
