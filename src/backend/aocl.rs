use crate::renderer::LocalStyle;
use crate::renderer::template::{Cast, HostTemplate, LocalType, Section};

pub(super) const TEMPLATE: HostTemplate = HostTemplate {
    host_file: "main.cpp",
    kernel_file: Some("device/{kernel}.cl"),
    embed_kernel: false,
    local_style: LocalStyle::Flat,
    local_type: LocalType::Native,
    local_prefix: "source_",
    cast: Cast::None,
    prologue: "\
#include <sys/ipc.h>
#include <sys/shm.h>
#include <assert.h>
#include <stdio.h>
#include <stdlib.h>
#include <math.h>
#include <cstring>
#include <vector>
#include \"CL/opencl.h\"
#include \"AOCLUtils/aocl_utils.h\"

using namespace aocl_utils;

// OpenCL runtime configuration
cl_platform_id platform = NULL;
cl_device_id device = NULL;
cl_context context = NULL;
cl_command_queue queue = NULL;
cl_program program = NULL;
cl_kernel kernel = NULL;

// Free the resources allocated, required by aocl_utils
void cleanup() {
  if(kernel) clReleaseKernel(kernel);
  if(queue) clReleaseCommandQueue(queue);
  if(program) clReleaseProgram(program);
  if(context) clReleaseContext(context);
}
",
    main_signature: "int main(int argc, char **argv)",
    main_body: &[
        Section::Unpack,
        Section::Text(
            "\
cl_int status;
if(!setCwdToExeDir()) {
  return 1;
}

// Get the OpenCL platform.
platform = findPlatform(\"Intel(R) FPGA SDK for OpenCL(TM)\");
if(platform == NULL) {
  printf(\"ERROR: Unable to find Intel(R) FPGA OpenCL platform.\\n\");
  return 1;
}

// Query the available OpenCL device.
cl_uint num_devices = 0;
scoped_array<cl_device_id> devices(getDevices(platform, CL_DEVICE_TYPE_ALL, &num_devices));
device = devices[0];

// Create the context and command queue
context = clCreateContext(NULL, 1, &device, &oclContextCallback, NULL, &status);
checkError(status, \"Failed to create context\");
queue = clCreateCommandQueue(context, device, CL_QUEUE_PROFILING_ENABLE, &status);
checkError(status, \"Failed to create command queue\");

// Create the program for the emulated device
std::string binary_file = getBoardBinaryFile(\"{kernel}\", device);
printf(\"Using AOCX: %s\\n\", binary_file.c_str());
program = createProgramFromBinary(context, binary_file.c_str(), &device, 1);
status = clBuildProgram(program, 0, NULL, \"\", NULL, NULL);
checkError(status, \"Failed to build program\");

// Kernel
kernel = clCreateKernel(program, \"{kernel}\", &status);
checkError(status, \"Failed to create kernel\");
",
        ),
        Section::EachArg {
            tensor: "\
cl_mem buffer_{i} = clCreateBuffer(context, CL_MEM_READ_WRITE, {bytes}, NULL, &status);
checkError(status, \"Failed to create buffer {i}\");
status = clEnqueueWriteBuffer(queue, buffer_{i}, CL_TRUE, 0, {bytes}, {local}.data(), 0, NULL, NULL);
checkError(status, \"Failed to write buffer {i}\");
status = clSetKernelArg(kernel, {i}, sizeof(cl_mem), &buffer_{i});
checkError(status, \"Failed to set argument {i}\");",
            scalar: "\
status = clSetKernelArg(kernel, {i}, sizeof({type}), &{local});
checkError(status, \"Failed to set argument {i}\");",
        },
        Section::Blank,
        Section::Text(
            "\
// Launch the kernel
status = clEnqueueTask(queue, kernel, 0, NULL, NULL);
checkError(status, \"Failed to launch kernel\");
clFinish(queue);

// Read the results back",
        ),
        Section::EachArg {
            tensor: "\
status = clEnqueueReadBuffer(queue, buffer_{i}, CL_TRUE, 0, {bytes}, {local}.data(), 0, NULL, NULL);
checkError(status, \"Failed to read buffer {i}\");
clReleaseMemObject(buffer_{i});",
            scalar: "",
        },
        Section::Blank,
        Section::Pack,
        Section::Text("\ncleanup();\nreturn 0;"),
    ],
    epilogue: "",
    lists: &[],
};
