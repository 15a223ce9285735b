//! Import pretrained Caffe networks and evaluate them on a pluggable
//! tensor-math backend.
//!
//! The crate converts decoded network descriptions into axis-normalized
//! weight tensors ([`blob`]), derives the layer dependency graph ([`graph`]),
//! dispatches each layer kind onto backend operations ([`layer`]) and ties
//! the lifecycle together in [`model::CaffeModel`]. Math kernels live behind
//! the [`backend::spec::MathBackend`] trait; a reference CPU implementation
//! ships as `caffe-rs-backend-ref-cpu`.

pub mod backend;
pub mod blob;
pub mod graph;
pub mod layer;
pub mod model;
pub mod proto;
pub mod tensor;
pub mod util;

pub use backend::spec::MathBackend;
pub use model::{CaffeModel, InMemoryResources, ModelResources};
pub use tensor::{DType, Shape, Tensor};
