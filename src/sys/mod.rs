//! Platform layer — libc linkage and errno access.

pub mod errno;
pub mod syscalls;
