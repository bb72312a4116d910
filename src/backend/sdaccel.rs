use crate::renderer::LocalStyle;
use crate::renderer::template::{Cast, HostTemplate, ListVar, LocalType, Section};

pub(super) const TEMPLATE: HostTemplate = HostTemplate {
    host_file: "main.cpp",
    kernel_file: Some("kernel.cl"),
    embed_kernel: false,
    local_style: LocalStyle::Flat,
    local_type: LocalType::Native,
    local_prefix: "source_",
    cast: Cast::None,
    prologue: "\
#define CL_HPP_CL_1_2_DEFAULT_BUILD
#define CL_HPP_TARGET_OPENCL_VERSION 120
#define CL_HPP_MINIMUM_OPENCL_VERSION 120
#define CL_HPP_ENABLE_PROGRAM_CONSTRUCTION_FROM_ARRAY_COMPATIBILITY 1

#include <sys/ipc.h>
#include <sys/shm.h>
#include <CL/cl2.hpp>
#include <cstdio>
#include <cstdlib>
#include <fstream>
#include <iostream>
#include <string>
#include <vector>
",
    main_signature: "int main(int argc, char **argv)",
    main_body: &[
        Section::Unpack,
        Section::Text(
            "\
std::vector<cl::Platform> platforms;
cl::Platform::get(&platforms);
cl::Platform platform;
for (size_t p = 0; p < platforms.size(); p++) {
  if (platforms[p].getInfo<CL_PLATFORM_NAME>() == \"Xilinx\") {
    platform = platforms[p];
    break;
  }
}
std::vector<cl::Device> devices;
platform.getDevices(CL_DEVICE_TYPE_ACCELERATOR, &devices);
devices.resize(1);
cl::Device device = devices[0];
cl::Context context(device);
cl::CommandQueue q(context, device);

std::ifstream bin_file(\"{kernel}.xclbin\", std::ifstream::binary);
bin_file.seekg(0, bin_file.end);
unsigned nb = bin_file.tellg();
bin_file.seekg(0, bin_file.beg);
std::vector<char> buf(nb);
bin_file.read(buf.data(), nb);
cl::Program::Binaries bins;
bins.push_back({buf.data(), nb});
cl::Program program(context, devices, bins);
cl::Kernel kernel(program, \"{kernel}\");
auto krnl = cl::KernelFunctor<{functor_types}>(kernel);

std::vector<cl::Memory> mem_objects;",
        ),
        Section::EachArg {
            tensor: "\
cl::Buffer buffer_{i}(context, CL_MEM_USE_HOST_PTR | CL_MEM_READ_WRITE, {bytes}, {local}.data());
mem_objects.push_back(buffer_{i});",
            scalar: "",
        },
        Section::Text(
            "
q.enqueueMigrateMemObjects(mem_objects, 0);
krnl(cl::EnqueueArgs(q, cl::NDRange(1, 1, 1), cl::NDRange(1, 1, 1)), {call_args});
q.enqueueMigrateMemObjects(mem_objects, CL_MIGRATE_MEM_OBJECT_HOST);
q.finish();",
        ),
        Section::Blank,
        Section::Pack,
        Section::Text("\nreturn 0;"),
    ],
    epilogue: "",
    lists: &[
        ListVar {
            name: "functor_types",
            tensor: "cl::Buffer&",
            scalar: "{type}",
            separator: ", ",
        },
        ListVar {
            name: "call_args",
            tensor: "buffer_{i}",
            scalar: "{local}",
            separator: ", ",
        },
    ],
};
