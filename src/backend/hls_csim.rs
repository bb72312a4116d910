use crate::renderer::LocalStyle;
use crate::renderer::template::{Cast, HostTemplate, ListVar, LocalType, Section};

pub(super) const TEMPLATE: HostTemplate = HostTemplate {
    host_file: "main.cpp",
    kernel_file: None,
    embed_kernel: true,
    local_style: LocalStyle::Nested,
    local_type: LocalType::Hls,
    local_prefix: "arg_top_",
    cast: Cast::External,
    prologue: "\
#include <sys/ipc.h>
#include <sys/shm.h>
#include <stdio.h>
#include <stdlib.h>
#include <math.h>
#include <ap_int.h>
#include <ap_fixed.h>
",
    main_signature: "int main(void)",
    main_body: &[
        Section::Unpack,
        Section::Text("{kernel}({call_args});"),
        Section::Blank,
        Section::Pack,
        Section::Text("return 0;"),
    ],
    epilogue: "",
    lists: &[ListVar {
        name: "call_args",
        tensor: "{local}",
        scalar: "{local}",
        separator: ", ",
    }],
};
