//! Architecture-specific glue. This kernel targets 32-bit protected-mode
//! IA-32 only (`spec.md` §1); there is a single `x86` module, kept behind a
//! `cfg` so the crate still type-checks when built for the host test
//! target under `cargo test`.

#[cfg(target_arch = "x86")]
pub mod x86;

#[cfg(target_arch = "x86")]
pub use self::x86::*;

#[cfg(not(target_arch = "x86"))]
pub mod host_stub;
#[cfg(not(target_arch = "x86"))]
pub use host_stub::*;
