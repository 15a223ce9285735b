//! Layer dispatch: maps a decoded layer spec onto backend tensor operations.
//!
//! Layer kinds form a closed enumeration with exhaustive matching, so an
//! unhandled kind is a compile-time gap instead of a runtime default branch.
//! Unknown type tags and unknown pool tags are fatal errors carrying the
//! offending layer spec; they are never silently skipped.

use anyhow::{bail, ensure, Result};
use thiserror::Error;

use crate::backend::spec::{
    Conv2dSpec, LrnSpec, MathBackend, NormRegion, Pool2dSpec, PoolKind, UnaryOp,
};
use crate::proto::{LayerParameter, NormRegionParam, NumParam, PoolParam};
use crate::tensor::Tensor;

// Wire values of the pooling-method and LRN-region enums.
const POOL_MAX: i64 = 0;
const POOL_AVE: i64 = 1;
const NORM_REGION_WITHIN_CHANNEL: i64 = 1;

/// Fatal dispatch errors; each carries enough of the offending spec to
/// diagnose the model without re-parsing it.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("layer type '{}' is not implemented (layer '{}')", .layer.kind, .layer.name)]
    UnsupportedLayer { layer: Box<LayerParameter> },
    #[error("pool type '{pool}' is not implemented (layer '{}')", .layer.name)]
    UnsupportedPool {
        pool: String,
        layer: Box<LayerParameter>,
    },
    #[error("layer '{layer}' requires a weight tensor at index {index}")]
    MissingWeights { layer: String, index: usize },
    #[error("parameter '{param}' of layer '{layer}' uses an unsupported multi-element form")]
    UnsupportedParam {
        param: &'static str,
        layer: String,
    },
}

/// Closed enumeration of supported layer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Input,
    Dropout,
    InnerProduct,
    Convolution,
    Pooling,
    BatchNorm,
    Lrn,
    Scale,
    Relu,
    Elu,
    Prelu,
    TanH,
    Sigmoid,
    Softmax,
    Concat,
}

impl LayerKind {
    /// Parses a case-insensitive type tag, accepting the historical aliases.
    pub fn parse(tag: &str) -> Option<LayerKind> {
        Some(match tag.to_ascii_lowercase().as_str() {
            "input" => LayerKind::Input,
            "dropout" => LayerKind::Dropout,
            "fc" | "innerproduct" | "inner_product" => LayerKind::InnerProduct,
            "conv" | "convolution" => LayerKind::Convolution,
            "pool" | "pooling" => LayerKind::Pooling,
            "batchnorm" => LayerKind::BatchNorm,
            "lrn" => LayerKind::Lrn,
            "scale" => LayerKind::Scale,
            "relu" => LayerKind::Relu,
            "elu" => LayerKind::Elu,
            "prelu" => LayerKind::Prelu,
            "tanh" => LayerKind::TanH,
            "sigmoid" => LayerKind::Sigmoid,
            "softmax" => LayerKind::Softmax,
            "concat" => LayerKind::Concat,
            _ => return None,
        })
    }
}

/// Input activations handed to one dispatch step.
#[derive(Debug, Clone, Copy)]
pub enum OpInput<'a> {
    Single(&'a Tensor),
    Many(&'a [Tensor]),
}

impl<'a> OpInput<'a> {
    fn single(&self, layer: &LayerParameter) -> Result<&'a Tensor> {
        match *self {
            OpInput::Single(t) => Ok(t),
            OpInput::Many([t]) => Ok(t),
            OpInput::Many(ts) => bail!(
                "layer '{}' ({}) expects one input, got {}",
                layer.name,
                layer.kind,
                ts.len()
            ),
        }
    }

    fn many(&self) -> &'a [Tensor] {
        match *self {
            OpInput::Single(t) => std::slice::from_ref(t),
            OpInput::Many(ts) => ts,
        }
    }
}

/// Applies one layer to its resolved input(s) and returns the output tensor.
///
/// `weights` are the layer's converted blobs (absent for weight-free layers);
/// they are read, never mutated.
pub fn perform_op<B: MathBackend>(
    backend: &B,
    input: OpInput<'_>,
    layer: &LayerParameter,
    weights: Option<&[Tensor]>,
) -> Result<Tensor> {
    let Some(kind) = LayerKind::parse(&layer.kind) else {
        bail!(LayerError::UnsupportedLayer {
            layer: Box::new(layer.clone()),
        });
    };

    match kind {
        // Identity pass-through at inference time.
        LayerKind::Input | LayerKind::Dropout => Ok(input.single(layer)?.clone()),

        LayerKind::InnerProduct => {
            let params = layer.inner_product_param.clone().unwrap_or_default();
            let weight = required_weight(weights, layer, 0)?;
            ensure!(
                weight.shape().rank() == 2,
                "inner-product weight of layer '{}' must be rank 2, got {:?}",
                layer.name,
                weight.shape().dims()
            );
            let x = input.single(layer)?.flattened()?;
            let mut y = backend.matvec(weight, &x)?;
            if params.bias_term != Some(false) {
                let bias = required_weight(weights, layer, 1)?.flattened()?;
                y = backend.add(&y, &bias)?;
            }
            Ok(y)
        }

        LayerKind::Convolution => {
            let params = layer.convolution_param.clone().unwrap_or_default();
            let stride = numeric_param(params.stride.as_ref(), "stride", layer, 1)?;
            let pad = numeric_param(params.pad.as_ref(), "pad", layer, 0)?;
            // Kernel extent is implied by the filter tensor.
            let filter = required_weight(weights, layer, 0)?;
            let bias = if params.bias_term != Some(false) {
                Some(required_weight(weights, layer, 1)?.flattened()?)
            } else {
                None
            };
            let spec = Conv2dSpec {
                stride: [stride, stride],
                pad: [pad, pad],
            };
            Ok(backend.conv2d(input.single(layer)?, filter, bias.as_ref(), &spec)?)
        }

        LayerKind::Pooling => {
            let params = layer.pooling_param.clone().unwrap_or_default();
            let x = input.single(layer)?;
            ensure!(
                x.shape().rank() == 3,
                "pooling input of layer '{}' must be rank 3, got {:?}",
                layer.name,
                x.shape().dims()
            );

            let stride = spatial_param(
                params.stride.as_ref(),
                params.stride_h,
                params.stride_w,
                "stride",
                layer,
                1,
            )?;
            let pad = numeric_param(params.pad.as_ref(), "pad", layer, 0)?;
            let window = if params.global_pooling == Some(true) {
                // Global pooling covers the current spatial extent, ignoring
                // any declared kernel parameters.
                [x.shape().dims()[0], x.shape().dims()[1]]
            } else {
                spatial_param(
                    params.kernel_size.as_ref(),
                    params.kernel_h,
                    params.kernel_w,
                    "kernel_size",
                    layer,
                    1,
                )?
            };
            let spec = Pool2dSpec {
                window,
                stride,
                pad: [pad, pad],
            };
            match pool_kind(params.pool.as_ref(), layer)? {
                PoolKind::Max => Ok(backend.max_pool2d(x, &spec)?),
                PoolKind::Average => Ok(backend.avg_pool2d(x, &spec)?),
            }
        }

        LayerKind::BatchNorm => {
            let eps = layer
                .batch_norm_param
                .as_ref()
                .and_then(|p| p.eps)
                .unwrap_or(1e-5);
            let mean = required_weight(weights, layer, 0)?.flattened()?;
            let variance = required_weight(weights, layer, 1)?.flattened()?;
            Ok(backend.batch_norm(input.single(layer)?, &mean, &variance, eps)?)
        }

        LayerKind::Lrn => {
            let params = layer.lrn_param.clone().unwrap_or_default();
            let local_size = params.local_size.unwrap_or(5);
            let radius = match local_size / 2 {
                0 => 2,
                r => r as usize,
            };
            let alpha = match params.alpha.unwrap_or(1.0) / local_size.max(1) as f32 {
                a if a != 0.0 && a.is_finite() => a,
                _ => 1.0,
            };
            let spec = LrnSpec {
                radius,
                bias: params.k.filter(|&k| k != 0.0).unwrap_or(1.0),
                alpha,
                beta: params.beta.filter(|&b| b != 0.0).unwrap_or(0.75),
                region: norm_region(params.norm_region.as_ref()),
            };
            Ok(backend.local_response_norm(input.single(layer)?, &spec)?)
        }

        LayerKind::Scale => {
            let params = layer.scale_param.clone().unwrap_or_default();
            let scale = required_weight(weights, layer, 0)?;
            let mut out = backend.mul(input.single(layer)?, scale)?;
            if params.bias_term == Some(true) {
                let bias = required_weight(weights, layer, 1)?;
                out = backend.add(&out, bias)?;
            }
            Ok(out)
        }

        LayerKind::Relu => Ok(backend.unary(UnaryOp::Relu, input.single(layer)?)?),
        LayerKind::Elu => Ok(backend.unary(UnaryOp::Elu, input.single(layer)?)?),
        LayerKind::TanH => Ok(backend.unary(UnaryOp::Tanh, input.single(layer)?)?),
        LayerKind::Sigmoid => Ok(backend.unary(UnaryOp::Sigmoid, input.single(layer)?)?),

        LayerKind::Prelu => {
            let alpha = required_weight(weights, layer, 0)?.flattened()?;
            Ok(backend.prelu(input.single(layer)?, &alpha)?)
        }

        LayerKind::Softmax => {
            let x = input.single(layer)?;
            let rank = x.shape().rank() as i64;
            let axis = match layer.softmax_param.as_ref().and_then(|p| p.axis) {
                Some(axis) => {
                    let resolved = if axis < 0 { axis + rank } else { axis };
                    ensure!(
                        (0..rank).contains(&resolved),
                        "softmax axis {} of layer '{}' is out of range for rank {}",
                        axis,
                        layer.name,
                        rank
                    );
                    resolved as usize
                }
                None => rank as usize - 1,
            };
            Ok(backend.softmax(x, axis)?)
        }

        LayerKind::Concat => {
            let inputs = input.many();
            ensure!(
                !inputs.is_empty(),
                "concat layer '{}' received no inputs",
                layer.name
            );
            // Successive pairwise channel concatenation, left to right.
            let mut out = inputs[0].clone();
            for t in &inputs[1..] {
                out = backend.concat(&out, t, 2)?;
            }
            Ok(out)
        }
    }
}

fn required_weight<'a>(
    weights: Option<&'a [Tensor]>,
    layer: &LayerParameter,
    index: usize,
) -> Result<&'a Tensor> {
    weights
        .and_then(|ts| ts.get(index))
        .ok_or_else(|| {
            LayerError::MissingWeights {
                layer: layer.name.clone(),
                index,
            }
            .into()
        })
}

/// Resolves a scalar-or-length-1-list numeric parameter.
///
/// A zero value counts as unset and yields the default; multi-element lists
/// are rejected rather than approximated.
fn numeric_param(
    param: Option<&NumParam>,
    name: &'static str,
    layer: &LayerParameter,
    default: usize,
) -> Result<usize> {
    let value = match param {
        None => None,
        Some(NumParam::Scalar(v)) => Some(*v),
        Some(NumParam::List(vs)) => match vs.as_slice() {
            [] => None,
            [v] => Some(*v),
            _ => bail!(LayerError::UnsupportedParam {
                param: name,
                layer: layer.name.clone(),
            }),
        },
    };
    match value {
        Some(v) if v > 0.0 => Ok(v as usize),
        _ => Ok(default),
    }
}

/// Resolves a 1-or-2D spatial parameter to `[h, w]`.
///
/// An explicit combined value wins (a scalar applies to both axes, a pair is
/// taken as `[h, w]`); otherwise separate height/width scalars; otherwise the
/// default on both axes.
fn spatial_param(
    combined: Option<&NumParam>,
    height: Option<f64>,
    width: Option<f64>,
    name: &'static str,
    layer: &LayerParameter,
    default: usize,
) -> Result<[usize; 2]> {
    if let Some(param) = combined {
        return match param {
            NumParam::Scalar(v) => Ok([*v as usize; 2]),
            NumParam::List(vs) => match vs.as_slice() {
                [v] => Ok([*v as usize; 2]),
                [h, w] => Ok([*h as usize, *w as usize]),
                _ => bail!(LayerError::UnsupportedParam {
                    param: name,
                    layer: layer.name.clone(),
                }),
            },
        };
    }
    if let (Some(h), Some(w)) = (height, width) {
        return Ok([h as usize, w as usize]);
    }
    Ok([default; 2])
}

/// Maps the pool parameter (wire enum index or string tag) to a pool kind.
fn pool_kind(param: Option<&PoolParam>, layer: &LayerParameter) -> Result<PoolKind> {
    match param {
        // The wire default is MAX.
        None => Ok(PoolKind::Max),
        Some(PoolParam::Index(POOL_MAX)) => Ok(PoolKind::Max),
        Some(PoolParam::Index(POOL_AVE)) => Ok(PoolKind::Average),
        Some(PoolParam::Index(other)) => bail!(LayerError::UnsupportedPool {
            pool: other.to_string(),
            layer: Box::new(layer.clone()),
        }),
        Some(PoolParam::Tag(tag)) => match tag.to_ascii_lowercase().as_str() {
            "max" => Ok(PoolKind::Max),
            "ave" => Ok(PoolKind::Average),
            _ => bail!(LayerError::UnsupportedPool {
                pool: tag.clone(),
                layer: Box::new(layer.clone()),
            }),
        },
    }
}

fn norm_region(param: Option<&NormRegionParam>) -> NormRegion {
    match param {
        Some(NormRegionParam::Index(NORM_REGION_WITHIN_CHANNEL)) => NormRegion::WithinChannel,
        Some(NormRegionParam::Tag(tag)) if tag.eq_ignore_ascii_case("within_channel") => {
            NormRegion::WithinChannel
        }
        _ => NormRegion::AcrossChannels,
    }
}
