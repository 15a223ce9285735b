//! Scalar CPU kernels.

use caffe_rs::backend::spec::{
    BackendError, BackendResult, Conv2dSpec, LrnSpec, MathBackend, NormRegion, Pool2dSpec, UnaryOp,
};
use caffe_rs::tensor::{DType, Shape, Tensor};

/// Pure-Rust scalar backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuMathBackend;

impl CpuMathBackend {
    pub fn new() -> Self {
        CpuMathBackend
    }
}

impl MathBackend for CpuMathBackend {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn cast_f32(&self, x: &Tensor) -> BackendResult<Tensor> {
        match x.dtype() {
            DType::F32 => Ok(x.clone()),
            DType::U8 => {
                let values = x.data_u8().iter().map(|&v| v as f32).collect();
                Tensor::from_vec(x.shape().clone(), values)
                    .map_err(|e| BackendError::execution(e.to_string()))
            }
        }
    }

    fn reverse(&self, x: &Tensor, axis: isize) -> BackendResult<Tensor> {
        let dims = x.shape().dims();
        let axis = normalize_axis("reverse", axis, dims.len())?;
        let (outer, len, inner) = split_at_axis(dims, axis);
        let src = x.data();
        let mut out = vec![0.0f32; src.len()];
        for o in 0..outer {
            for a in 0..len {
                let flipped = len - 1 - a;
                let src_base = (o * len + a) * inner;
                let dst_base = (o * len + flipped) * inner;
                out[dst_base..dst_base + inner].copy_from_slice(&src[src_base..src_base + inner]);
            }
        }
        tensor(x.shape().clone(), out)
    }

    fn resize_bilinear(&self, x: &Tensor, out_hw: [usize; 2]) -> BackendResult<Tensor> {
        let [h, w, c] = expect_hwc("resize_bilinear", x)?;
        let [oh, ow] = out_hw;
        if oh == 0 || ow == 0 {
            return Err(BackendError::shape(
                "resize_bilinear",
                "output extents must be positive",
            ));
        }
        let src = x.data();
        let mut out = vec![0.0f32; oh * ow * c];
        let scale_y = h as f32 / oh as f32;
        let scale_x = w as f32 / ow as f32;
        for y in 0..oh {
            let sy = y as f32 * scale_y;
            let y0 = (sy.floor() as usize).min(h - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fy = sy - y0 as f32;
            for xo in 0..ow {
                let sx = xo as f32 * scale_x;
                let x0 = (sx.floor() as usize).min(w - 1);
                let x1 = (x0 + 1).min(w - 1);
                let fx = sx - x0 as f32;
                for ch in 0..c {
                    let tl = src[(y0 * w + x0) * c + ch];
                    let tr = src[(y0 * w + x1) * c + ch];
                    let bl = src[(y1 * w + x0) * c + ch];
                    let br = src[(y1 * w + x1) * c + ch];
                    let top = tl + (tr - tl) * fx;
                    let bottom = bl + (br - bl) * fx;
                    out[(y * ow + xo) * c + ch] = top + (bottom - top) * fy;
                }
            }
        }
        tensor(Shape::new(vec![oh, ow, c]), out)
    }

    fn add(&self, a: &Tensor, b: &Tensor) -> BackendResult<Tensor> {
        binary("add", a, b, |x, y| x + y)
    }

    fn sub(&self, a: &Tensor, b: &Tensor) -> BackendResult<Tensor> {
        binary("sub", a, b, |x, y| x - y)
    }

    fn mul(&self, a: &Tensor, b: &Tensor) -> BackendResult<Tensor> {
        binary("mul", a, b, |x, y| x * y)
    }

    fn matvec(&self, weight: &Tensor, x: &Tensor) -> BackendResult<Tensor> {
        let wdims = weight.shape().dims();
        if wdims.len() != 2 {
            return Err(BackendError::shape(
                "matvec",
                format!("weight must be rank 2, got {:?}", wdims),
            ));
        }
        let (i_len, o_len) = (wdims[0], wdims[1]);
        if x.len() != i_len {
            return Err(BackendError::shape(
                "matvec",
                format!("input length {} does not match weight rows {}", x.len(), i_len),
            ));
        }
        let w = weight.data();
        let v = x.data();
        let mut out = vec![0.0f32; o_len];
        for i in 0..i_len {
            let xi = v[i];
            for o in 0..o_len {
                out[o] += w[i * o_len + o] * xi;
            }
        }
        tensor(Shape::new(vec![o_len]), out)
    }

    fn conv2d(
        &self,
        x: &Tensor,
        filter: &Tensor,
        bias: Option<&Tensor>,
        spec: &Conv2dSpec,
    ) -> BackendResult<Tensor> {
        let [h, w, cin] = expect_hwc("conv2d", x)?;
        let fdims = filter.shape().dims();
        if fdims.len() != 4 || fdims[2] != cin {
            return Err(BackendError::shape(
                "conv2d",
                format!(
                    "filter must be [KW, KH, {}, C_out], got {:?}",
                    cin, fdims
                ),
            ));
        }
        let (kw, kh, cout) = (fdims[0], fdims[1], fdims[3]);
        let [sh, sw] = spec.stride;
        let [ph, pw] = spec.pad;
        if sh == 0 || sw == 0 {
            return Err(BackendError::shape("conv2d", "stride must be positive"));
        }
        if let Some(b) = bias {
            if b.len() != cout {
                return Err(BackendError::shape(
                    "conv2d",
                    format!("bias length {} does not match C_out {}", b.len(), cout),
                ));
            }
        }
        if h + 2 * ph < kh || w + 2 * pw < kw {
            return Err(BackendError::shape(
                "conv2d",
                "kernel larger than padded input",
            ));
        }
        // Floor rounding for the output extents.
        let oh = (h + 2 * ph - kh) / sh + 1;
        let ow = (w + 2 * pw - kw) / sw + 1;

        let src = x.data();
        let flt = filter.data();
        let mut out = vec![0.0f32; oh * ow * cout];
        for y in 0..oh {
            for xo in 0..ow {
                for co in 0..cout {
                    let mut acc = bias.map_or(0.0, |b| b.data()[co]);
                    for ky in 0..kh {
                        let iy = (y * sh + ky) as isize - ph as isize;
                        if iy < 0 || iy as usize >= h {
                            continue;
                        }
                        for kx in 0..kw {
                            let ix = (xo * sw + kx) as isize - pw as isize;
                            if ix < 0 || ix as usize >= w {
                                continue;
                            }
                            for ci in 0..cin {
                                let v = src[((iy as usize) * w + ix as usize) * cin + ci];
                                let f = flt[((kx * kh + ky) * cin + ci) * cout + co];
                                acc += v * f;
                            }
                        }
                    }
                    out[(y * ow + xo) * cout + co] = acc;
                }
            }
        }
        tensor(Shape::new(vec![oh, ow, cout]), out)
    }

    fn max_pool2d(&self, x: &Tensor, spec: &Pool2dSpec) -> BackendResult<Tensor> {
        pool2d("max_pool2d", x, spec, PoolReduce::Max)
    }

    fn avg_pool2d(&self, x: &Tensor, spec: &Pool2dSpec) -> BackendResult<Tensor> {
        pool2d("avg_pool2d", x, spec, PoolReduce::Average)
    }

    fn batch_norm(
        &self,
        x: &Tensor,
        mean: &Tensor,
        variance: &Tensor,
        eps: f32,
    ) -> BackendResult<Tensor> {
        let c = trailing_dim(x);
        if mean.len() != c || variance.len() != c {
            return Err(BackendError::shape(
                "batch_norm",
                format!(
                    "statistics lengths ({}, {}) do not match channel count {}",
                    mean.len(),
                    variance.len(),
                    c
                ),
            ));
        }
        let m = mean.data();
        let v = variance.data();
        let out = x
            .data()
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let ch = i % c;
                (value - m[ch]) / (v[ch] + eps).sqrt()
            })
            .collect();
        tensor(x.shape().clone(), out)
    }

    fn local_response_norm(&self, x: &Tensor, spec: &LrnSpec) -> BackendResult<Tensor> {
        let [h, w, c] = expect_hwc("local_response_norm", x)?;
        let src = x.data();
        let mut out = vec![0.0f32; src.len()];
        let radius = spec.radius as isize;
        for y in 0..h {
            for xo in 0..w {
                for ch in 0..c {
                    let mut energy = 0.0f32;
                    match spec.region {
                        NormRegion::AcrossChannels => {
                            let lo = (ch as isize - radius).max(0) as usize;
                            let hi = ((ch as isize + radius) as usize).min(c - 1);
                            for d in lo..=hi {
                                let v = src[(y * w + xo) * c + d];
                                energy += v * v;
                            }
                        }
                        NormRegion::WithinChannel => {
                            let y_lo = (y as isize - radius).max(0) as usize;
                            let y_hi = ((y as isize + radius) as usize).min(h - 1);
                            let x_lo = (xo as isize - radius).max(0) as usize;
                            let x_hi = ((xo as isize + radius) as usize).min(w - 1);
                            for wy in y_lo..=y_hi {
                                for wx in x_lo..=x_hi {
                                    let v = src[(wy * w + wx) * c + ch];
                                    energy += v * v;
                                }
                            }
                        }
                    }
                    let idx = (y * w + xo) * c + ch;
                    out[idx] = src[idx] / (spec.bias + spec.alpha * energy).powf(spec.beta);
                }
            }
        }
        tensor(x.shape().clone(), out)
    }

    fn unary(&self, op: UnaryOp, x: &Tensor) -> BackendResult<Tensor> {
        let f: fn(f32) -> f32 = match op {
            UnaryOp::Relu => |v| v.max(0.0),
            UnaryOp::Elu => |v| if v > 0.0 { v } else { v.exp() - 1.0 },
            UnaryOp::Tanh => f32::tanh,
            UnaryOp::Sigmoid => |v| 1.0 / (1.0 + (-v).exp()),
        };
        tensor(x.shape().clone(), x.data().iter().map(|&v| f(v)).collect())
    }

    fn prelu(&self, x: &Tensor, alpha: &Tensor) -> BackendResult<Tensor> {
        let c = trailing_dim(x);
        if alpha.len() != c {
            return Err(BackendError::shape(
                "prelu",
                format!("alpha length {} does not match channel count {}", alpha.len(), c),
            ));
        }
        let a = alpha.data();
        let out = x
            .data()
            .iter()
            .enumerate()
            .map(|(i, &v)| if v > 0.0 { v } else { a[i % c] * v })
            .collect();
        tensor(x.shape().clone(), out)
    }

    fn softmax(&self, x: &Tensor, axis: usize) -> BackendResult<Tensor> {
        let dims = x.shape().dims();
        if axis >= dims.len() {
            return Err(BackendError::shape(
                "softmax",
                format!("axis {} out of range for rank {}", axis, dims.len()),
            ));
        }
        let (outer, len, inner) = split_at_axis(dims, axis);
        let src = x.data();
        let mut out = vec![0.0f32; src.len()];
        for o in 0..outer {
            for i in 0..inner {
                let index = |a: usize| (o * len + a) * inner + i;
                let mut max = f32::NEG_INFINITY;
                for a in 0..len {
                    max = max.max(src[index(a)]);
                }
                let mut sum = 0.0f32;
                for a in 0..len {
                    let e = (src[index(a)] - max).exp();
                    out[index(a)] = e;
                    sum += e;
                }
                for a in 0..len {
                    out[index(a)] /= sum;
                }
            }
        }
        tensor(x.shape().clone(), out)
    }

    fn concat(&self, a: &Tensor, b: &Tensor, axis: usize) -> BackendResult<Tensor> {
        let adims = a.shape().dims();
        let bdims = b.shape().dims();
        if adims.len() != bdims.len() || axis >= adims.len() {
            return Err(BackendError::shape(
                "concat",
                format!("incompatible ranks {:?} vs {:?} on axis {}", adims, bdims, axis),
            ));
        }
        for (d, (&da, &db)) in adims.iter().zip(bdims).enumerate() {
            if d != axis && da != db {
                return Err(BackendError::shape(
                    "concat",
                    format!("extent mismatch on axis {}: {} vs {}", d, da, db),
                ));
            }
        }
        let (outer, a_len, inner) = split_at_axis(adims, axis);
        let b_len = bdims[axis];
        let mut dims = adims.to_vec();
        dims[axis] = a_len + b_len;

        let src_a = a.data();
        let src_b = b.data();
        let mut out = vec![0.0f32; outer * (a_len + b_len) * inner];
        let a_block = a_len * inner;
        let b_block = b_len * inner;
        for o in 0..outer {
            let dst = o * (a_block + b_block);
            out[dst..dst + a_block].copy_from_slice(&src_a[o * a_block..(o + 1) * a_block]);
            out[dst + a_block..dst + a_block + b_block]
                .copy_from_slice(&src_b[o * b_block..(o + 1) * b_block]);
        }
        tensor(Shape::new(dims), out)
    }
}

enum PoolReduce {
    Max,
    Average,
}

fn pool2d(op: &'static str, x: &Tensor, spec: &Pool2dSpec, reduce: PoolReduce) -> BackendResult<Tensor> {
    let [h, w, c] = expect_hwc(op, x)?;
    let [win_h, win_w] = spec.window;
    let [sh, sw] = spec.stride;
    let [ph, pw] = spec.pad;
    if win_h == 0 || win_w == 0 || sh == 0 || sw == 0 {
        return Err(BackendError::shape(op, "window and stride must be positive"));
    }
    if h + 2 * ph < win_h || w + 2 * pw < win_w {
        return Err(BackendError::shape(op, "window larger than padded input"));
    }
    // Ceil rounding for the output extents; the last window must still
    // start inside the input, so an oversized stride drops one output.
    let mut oh = (h + 2 * ph - win_h).div_ceil(sh) + 1;
    let mut ow = (w + 2 * pw - win_w).div_ceil(sw) + 1;
    if (oh - 1) * sh >= h + ph {
        oh -= 1;
    }
    if (ow - 1) * sw >= w + pw {
        ow -= 1;
    }

    let src = x.data();
    let mut out = vec![0.0f32; oh * ow * c];
    for y in 0..oh {
        let y_start = (y * sh) as isize - ph as isize;
        let y_lo = y_start.max(0) as usize;
        let y_hi = ((y_start + win_h as isize) as usize).min(h);
        for xo in 0..ow {
            let x_start = (xo * sw) as isize - pw as isize;
            let x_lo = x_start.max(0) as usize;
            let x_hi = ((x_start + win_w as isize) as usize).min(w);
            for ch in 0..c {
                let value = match reduce {
                    PoolReduce::Max => {
                        let mut best = f32::NEG_INFINITY;
                        for wy in y_lo..y_hi {
                            for wx in x_lo..x_hi {
                                best = best.max(src[(wy * w + wx) * c + ch]);
                            }
                        }
                        best
                    }
                    PoolReduce::Average => {
                        let mut sum = 0.0f32;
                        for wy in y_lo..y_hi {
                            for wx in x_lo..x_hi {
                                sum += src[(wy * w + wx) * c + ch];
                            }
                        }
                        // Padded positions count as zeros toward the mean.
                        sum / (win_h * win_w) as f32
                    }
                };
                out[(y * ow + xo) * c + ch] = value;
            }
        }
    }
    tensor(Shape::new(vec![oh, ow, c]), out)
}

fn binary(
    op: &'static str,
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> BackendResult<Tensor> {
    let lhs = a.data();
    let rhs = b.data();
    if a.shape().dims() == b.shape().dims() {
        let out = lhs.iter().zip(rhs).map(|(&x, &y)| f(x, y)).collect();
        return tensor(a.shape().clone(), out);
    }
    // Rank-1 right operand broadcasts over the trailing axis.
    if b.shape().rank() == 1 && rhs.len() == trailing_dim(a) {
        let c = rhs.len();
        let out = lhs
            .iter()
            .enumerate()
            .map(|(i, &x)| f(x, rhs[i % c]))
            .collect();
        return tensor(a.shape().clone(), out);
    }
    Err(BackendError::shape(
        op,
        format!(
            "operand shapes {:?} and {:?} are not compatible",
            a.shape().dims(),
            b.shape().dims()
        ),
    ))
}

fn tensor(shape: Shape, values: Vec<f32>) -> BackendResult<Tensor> {
    Tensor::from_vec(shape, values).map_err(|e| BackendError::execution(e.to_string()))
}

fn normalize_axis(op: &'static str, axis: isize, rank: usize) -> BackendResult<usize> {
    let resolved = if axis < 0 { axis + rank as isize } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(BackendError::shape(
            op,
            format!("axis {} out of range for rank {}", axis, rank),
        ));
    }
    Ok(resolved as usize)
}

fn split_at_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = dims[..axis].iter().product();
    let inner = dims[axis + 1..].iter().product();
    (outer, dims[axis], inner)
}

fn trailing_dim(x: &Tensor) -> usize {
    *x.shape().dims().last().unwrap_or(&1)
}

fn expect_hwc(op: &'static str, x: &Tensor) -> BackendResult<[usize; 3]> {
    let dims = x.shape().dims();
    if dims.len() != 3 {
        return Err(BackendError::shape(
            op,
            format!("expected a rank-3 [H, W, C] tensor, got {:?}", dims),
        ));
    }
    Ok([dims[0], dims[1], dims[2]])
}
