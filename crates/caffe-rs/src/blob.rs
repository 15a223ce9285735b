//! Blob-to-tensor conversion: axis-layout normalization of Caffe weights.
//!
//! Caffe stores weights filter-major row-major (`[F, D, H, W]`); backend
//! kernels expect spatial-minor, channel-next, filter-last layout. The
//! permutation happens exactly once, here; converted tensors are never
//! re-permuted downstream. An incorrect mapping would not fail loudly, it
//! would silently corrupt every convolution result, which is why the index
//! arithmetic below mirrors the storage convention term by term.

use std::collections::HashMap;

use anyhow::{ensure, Result};
use tracing::warn;

use crate::proto::{BlobProto, NetParameter};
use crate::tensor::{Shape, Tensor};

/// Resolves the dimension list of a blob.
///
/// An explicit `shape.dim` wins; otherwise the legacy fixed fields
/// `{num, channels, height, width}` contribute their present, positive
/// values in that order.
fn blob_dims(blob: &BlobProto) -> Vec<usize> {
    if let Some(shape) = &blob.shape {
        return shape.dim.iter().map(|&d| d.max(0) as usize).collect();
    }
    [blob.num, blob.channels, blob.height, blob.width]
        .iter()
        .filter_map(|d| d.filter(|&v| v > 0))
        .map(|d| d as usize)
        .collect()
}

/// Converts a decoded blob into an axis-normalized tensor.
///
/// Exact mapping by rank:
/// - rank 1: unchanged;
/// - rank 2 `(h, w)` -> `(w, h)`;
/// - rank 3 `(d, h, w)` -> `(w, h, d)`;
/// - rank 4 `(f, d, h, w)` -> `(w, h, d, f)`;
/// - rank 0 or above 4: flat tensor, unpermuted (documented limitation).
pub fn blob_to_tensor(blob: &BlobProto) -> Result<Tensor> {
    let data = &blob.data;
    let dims = blob_dims(blob);

    if !dims.is_empty() && dims.len() <= 4 {
        ensure!(
            data.len() == dims.iter().product::<usize>(),
            "blob data length ({}) does not match dims {:?}",
            data.len(),
            dims
        );
    }

    match dims.as_slice() {
        [_] => Tensor::from_vec(Shape::new(dims), data.clone()),
        &[h, w] => {
            let mut out = Tensor::zeros(Shape::new(vec![w, h]));
            {
                let values = out.data_mut();
                for y in 0..h {
                    for x in 0..w {
                        values[x * h + y] = data[y * w + x];
                    }
                }
            }
            Ok(out)
        }
        &[d, h, w] => {
            let mut out = Tensor::zeros(Shape::new(vec![w, h, d]));
            {
                let values = out.data_mut();
                for dd in 0..d {
                    for y in 0..h {
                        for x in 0..w {
                            values[(x * h + y) * d + dd] = data[(dd * h + y) * w + x];
                        }
                    }
                }
            }
            Ok(out)
        }
        &[f, d, h, w] => {
            let mut out = Tensor::zeros(Shape::new(vec![w, h, d, f]));
            {
                let values = out.data_mut();
                for ff in 0..f {
                    for dd in 0..d {
                        for y in 0..h {
                            for x in 0..w {
                                values[((x * h + y) * d + dd) * f + ff] =
                                    data[((ff * d + dd) * h + y) * w + x];
                            }
                        }
                    }
                }
            }
            Ok(out)
        }
        // Rank 0 or rank > 4: emit the raw buffer as a flat tensor.
        _ => Tensor::from_vec(Shape::new(vec![data.len()]), data.clone()),
    }
}

/// Converts every parametrized layer's blobs, keyed by layer name.
pub fn weight_map(net: &NetParameter) -> Result<HashMap<String, Vec<Tensor>>> {
    let mut variables = HashMap::new();
    for layer in net.ordered_layers() {
        if layer.blobs.is_empty() {
            continue;
        }
        let tensors = layer
            .blobs
            .iter()
            .map(blob_to_tensor)
            .collect::<Result<Vec<_>>>()?;
        variables.insert(layer.name.clone(), tensors);
    }
    Ok(variables)
}

/// Reads the training-mean offset from the first layer's transform block.
///
/// Inline mean values become a rank-1 tensor; a mean-file reference cannot be
/// resolved here (fetch is an external concern) and only logs a warning.
pub fn preprocess_offset(net: &NetParameter) -> Result<Option<Tensor>> {
    let Some(params) = net
        .ordered_layers()
        .first()
        .and_then(|layer| layer.transform_param.as_ref())
    else {
        return Ok(None);
    };

    if !params.mean_value.is_empty() {
        let offset = Tensor::from_vec(
            Shape::new(vec![params.mean_value.len()]),
            params.mean_value.clone(),
        )?;
        return Ok(Some(offset));
    }
    if let Some(mean_file) = &params.mean_file {
        warn!(mean_file = %mean_file, "training mean must be loaded from an external resource");
    }
    Ok(None)
}

/// Reads the crop dimension from the first layer's transform block.
pub fn preprocess_dim(net: &NetParameter) -> Option<usize> {
    net.ordered_layers()
        .first()
        .and_then(|layer| layer.transform_param.as_ref())
        .and_then(|params| params.crop_size)
        .filter(|&dim| dim > 0)
        .map(|dim| dim as usize)
}
