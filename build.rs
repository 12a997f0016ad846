//! Build script: pre-flight checks for GPU feature flags.
//!
//! Verifies the required toolkit is installed before whisper-rs-sys tries
//! to compile, so a missing SDK fails with a readable message instead of a
//! wall of C++ errors.

use std::process::Command;

fn main() {
    if cfg!(feature = "cuda") {
        check_tool(
            "nvcc",
            &["--version"],
            "CUDA toolkit not found (nvcc missing). Install cuda/nvidia-cuda-toolkit \
             or build with --features vulkan instead.",
        );
    }
    if cfg!(feature = "vulkan") {
        check_tool(
            "glslc",
            &["--version"],
            "Vulkan shader compiler not found (glslc missing). Install shaderc \
             and the vulkan headers/loader development packages.",
        );
    }
    if cfg!(feature = "hipblas") {
        check_tool(
            "hipcc",
            &["--version"],
            "ROCm not found (hipcc missing). Install the rocm/hip development \
             packages for your distribution.",
        );
    }
    if cfg!(feature = "openblas") {
        check_tool(
            "pkg-config",
            &["--exists", "openblas"],
            "OpenBLAS not found via pkg-config. Install libopenblas-dev (or your \
             distribution's equivalent).",
        );
    }
}

fn check_tool(tool: &str, args: &[&str], message: &str) {
    let found = Command::new(tool)
        .args(args)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !found {
        println!("cargo:warning={message}");
    }
}
