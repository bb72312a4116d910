use crate::renderer::LocalStyle;
use crate::renderer::template::{Cast, HostTemplate, LocalType, Section};

pub(super) const TEMPLATE: HostTemplate = HostTemplate {
    host_file: "host.cpp",
    kernel_file: Some("kernel.cl"),
    embed_kernel: false,
    local_style: LocalStyle::Nested,
    local_type: LocalType::Native,
    local_prefix: "arg_top_",
    cast: Cast::Native,
    prologue: "\
#include <sys/ipc.h>
#include <sys/shm.h>

// standard C/C++ headers
#include <cstdio>
#include <cstdlib>
#include <getopt.h>
#include <string>
#include <time.h>
#include <sys/time.h>

// opencl harness headers
#include \"CLWorld.h\"
#include \"CLKernel.h\"
#include \"CLMemObj.h\"

// harness namespace
using namespace rosetta;
",
    main_signature: "int main(int argc, char ** argv)",
    main_body: &[
        Section::Unpack,
        Section::Text(
            "\
// parse command line arguments for opencl version
std::string kernelFile(\"\");
parse_sdaccel_command_line_args(argc, argv, kernelFile);

// create OpenCL world
CLWorld world = CLWorld(TARGET_DEVICE, CL_DEVICE_TYPE_ACCELERATOR);

// add the bitstream file
world.addProgram(kernelFile);

// create kernels
CLKernel {kernel}(world.getContext(), world.getProgram(), \"{kernel}\", world.getDevice());

// create mem objects",
        ),
        Section::EachArg {
            tensor: "CLMemObj source_{i}((void*){local}, sizeof({type}), {count}, CL_MEM_READ_WRITE);",
            scalar: "",
        },
        Section::Text("\n// add them to the world"),
        Section::EachArg {
            tensor: "world.addMemObj(source_{i});",
            scalar: "",
        },
        Section::Text(
            "
// set work size
int global_size[3] = {1, 1, 1};
int local_size[3] = {1, 1, 1};
{kernel}.set_global(global_size);
{kernel}.set_local(local_size);

// add the kernel to the world
world.addKernel({kernel});

// set kernel arguments",
        ),
        Section::EachArg {
            tensor: "world.setMemKernelArg(0, {i}, {slot});",
            scalar: "world.setConstKernelArg(0, {i}, {local});",
        },
        Section::Text("\n// run\nworld.runKernels();\n\n// read the data back"),
        Section::EachArg {
            tensor: "world.readMemObj({slot});",
            scalar: "",
        },
        Section::Blank,
        Section::Pack,
        Section::Text("\nworld.releaseWorld();\nreturn 0;"),
    ],
    epilogue: "",
    lists: &[],
};
