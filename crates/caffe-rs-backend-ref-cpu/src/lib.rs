//! Reference CPU implementation of the `caffe-rs` math backend.
//!
//! Scalar loops, no vectorization. The point of this crate is to be an
//! unambiguous executable definition of every kernel, used by the core
//! crate's integration tests and by embedders that need a fallback engine.

pub mod cpu;

pub use cpu::CpuMathBackend;
