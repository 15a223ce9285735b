//! Core tensor abstractions shared across backends.
//!
//! The tensor module defines shapes, dtypes and the host-backed tensor type
//! that flows between blob conversion, the layer dispatcher and math
//! backends.

pub mod dtype;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use host_tensor::Tensor;
pub use shape::Shape;
