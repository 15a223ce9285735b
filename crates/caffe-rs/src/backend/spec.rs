//! Backend contract for tensor-math engines.
//!
//! `MathBackend` is the execution-context handle threaded explicitly through
//! every operation. There is no process-global "current backend": each model
//! holds its own handle, so independent inference sessions never share hidden
//! mutable state.
//!
//! Layout conventions enforced across implementations:
//! - activations are rank-3 `[H, W, C]` (rows, columns, channels);
//! - convolution filters are rank-4 `[KW, KH, C_in, C_out]` exactly as the
//!   blob permuter produces them;
//! - inner-product weights are rank-2 `[I, O]`;
//! - per-channel vectors (bias, batch-norm statistics, prelu alpha) are
//!   rank-1 `[C]` and broadcast over the trailing axis.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::Tensor;

/// Pooling reductions supported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    Max,
    Average,
}

/// Region over which local response normalization accumulates energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormRegion {
    AcrossChannels,
    WithinChannel,
}

/// Stateless elementwise activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Relu,
    Elu,
    Tanh,
    Sigmoid,
}

/// Fully describes a 2D convolution over an `[H, W, C]` activation.
///
/// The kernel extent is implied by the filter tensor; output extents use
/// floor rounding, matching the legacy convolution convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dSpec {
    pub stride: [usize; 2],
    pub pad: [usize; 2],
}

/// Window configuration shared by max and average pooling.
///
/// Output extents use ceil rounding, matching the legacy pooling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool2dSpec {
    pub window: [usize; 2],
    pub stride: [usize; 2],
    pub pad: [usize; 2],
}

/// Local-response-normalization parameters after default resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrnSpec {
    pub radius: usize,
    pub bias: f32,
    pub alpha: f32,
    pub beta: f32,
    pub region: NormRegion,
}

/// Errors surfaced by backend kernels.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} rejected its inputs: {reason}")]
    Shape { op: &'static str, reason: String },
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn shape(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Shape {
            op,
            reason: reason.into(),
        }
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Tensor-algebra engine invoked by the layer dispatcher.
///
/// Implementations never mutate their inputs; every method returns a freshly
/// owned tensor. Kernels may assume `F32` payloads except for [`cast_f32`],
/// which accepts raw `U8` image data.
///
/// [`cast_f32`]: MathBackend::cast_f32
pub trait MathBackend {
    /// Short identifier used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Converts a tensor to 32-bit float storage.
    fn cast_f32(&self, x: &Tensor) -> BackendResult<Tensor>;

    /// Reverses element order along one axis; negative axes count from the end.
    fn reverse(&self, x: &Tensor, axis: isize) -> BackendResult<Tensor>;

    /// Bilinearly resizes the spatial axes of an `[H, W, C]` tensor.
    fn resize_bilinear(&self, x: &Tensor, out_hw: [usize; 2]) -> BackendResult<Tensor>;

    /// Elementwise addition; a rank-1 right operand broadcasts over the
    /// trailing axis.
    fn add(&self, a: &Tensor, b: &Tensor) -> BackendResult<Tensor>;

    /// Elementwise subtraction with the same broadcast rule as [`add`].
    ///
    /// [`add`]: MathBackend::add
    fn sub(&self, a: &Tensor, b: &Tensor) -> BackendResult<Tensor>;

    /// Elementwise multiplication with the same broadcast rule as [`add`].
    ///
    /// [`add`]: MathBackend::add
    fn mul(&self, a: &Tensor, b: &Tensor) -> BackendResult<Tensor>;

    /// Matrix-vector product: `weight` is `[I, O]`, `x` is `[I]`, result `[O]`.
    fn matvec(&self, weight: &Tensor, x: &Tensor) -> BackendResult<Tensor>;

    /// 2D convolution of an `[H, W, C_in]` input with a `[KW, KH, C_in, C_out]`
    /// filter and optional `[C_out]` bias.
    fn conv2d(
        &self,
        x: &Tensor,
        filter: &Tensor,
        bias: Option<&Tensor>,
        spec: &Conv2dSpec,
    ) -> BackendResult<Tensor>;

    /// Max pooling over the spatial axes of an `[H, W, C]` input.
    fn max_pool2d(&self, x: &Tensor, spec: &Pool2dSpec) -> BackendResult<Tensor>;

    /// Average pooling over the spatial axes of an `[H, W, C]` input.
    fn avg_pool2d(&self, x: &Tensor, spec: &Pool2dSpec) -> BackendResult<Tensor>;

    /// Inference-time batch normalization with per-channel running statistics.
    fn batch_norm(
        &self,
        x: &Tensor,
        mean: &Tensor,
        variance: &Tensor,
        eps: f32,
    ) -> BackendResult<Tensor>;

    /// Local response normalization over an `[H, W, C]` input.
    fn local_response_norm(&self, x: &Tensor, spec: &LrnSpec) -> BackendResult<Tensor>;

    /// Stateless elementwise activation.
    fn unary(&self, op: UnaryOp, x: &Tensor) -> BackendResult<Tensor>;

    /// Parametric relu with per-channel `[C]` alpha.
    fn prelu(&self, x: &Tensor, alpha: &Tensor) -> BackendResult<Tensor>;

    /// Numerically stable softmax along one axis.
    fn softmax(&self, x: &Tensor, axis: usize) -> BackendResult<Tensor>;

    /// Concatenates two tensors along one axis; all other extents must match.
    fn concat(&self, a: &Tensor, b: &Tensor, axis: usize) -> BackendResult<Tensor>;
}
