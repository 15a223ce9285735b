//! Small helpers around prediction outputs.

use anyhow::{ensure, Result};

use crate::tensor::Tensor;

/// Top-k indices and values of a probability tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TopK {
    pub indices: Vec<usize>,
    pub values: Vec<f32>,
}

/// Returns the `k` largest entries of a class-probability tensor, best first.
pub fn top_k(prob: &Tensor, k: usize) -> Result<TopK> {
    ensure!(k > 0, "top_k requires k > 0");
    let data = prob.data();
    let mut order: Vec<usize> = (0..data.len()).collect();
    order.sort_by(|&a, &b| data[b].partial_cmp(&data[a]).unwrap_or(std::cmp::Ordering::Equal));
    order.truncate(k);
    let values = order.iter().map(|&i| data[i]).collect();
    Ok(TopK {
        indices: order,
        values,
    })
}
