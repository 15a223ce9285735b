//! Model lifecycle: load, predict, dispose.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use crate::backend::spec::MathBackend;
use crate::blob;
use crate::graph::{self, Edge, Node};
use crate::layer::{perform_op, OpInput};
use crate::proto::{BlobProto, LayerParameter, NetParameter};
use crate::tensor::Tensor;

/// Per-step observer invoked with (layer name, layer spec, activation).
///
/// Observation only: the callback cannot influence traversal.
pub type StepObserver<'a> = &'a mut dyn FnMut(&str, &LayerParameter, &Tensor);

/// Fetch-and-decode seam for the three model resources.
///
/// Transport and wire decoding stay external collaborators; implementations
/// hand back the structured parameter objects. `load` fails if any accessor
/// fails.
pub trait ModelResources {
    /// The binary weight resource (caffemodel).
    fn weights(&self) -> Result<NetParameter>;
    /// The text graph-definition resource (prototxt), key-normalized.
    fn graph(&self) -> Result<NetParameter>;
    /// Optional external training-mean resource (binaryproto).
    fn mean(&self) -> Result<Option<BlobProto>> {
        Ok(None)
    }
}

/// In-memory resource bundle, useful for embedders and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResources {
    pub weights: NetParameter,
    pub graph: NetParameter,
    pub mean: Option<BlobProto>,
}

impl ModelResources for InMemoryResources {
    fn weights(&self) -> Result<NetParameter> {
        Ok(self.weights.clone())
    }

    fn graph(&self) -> Result<NetParameter> {
        Ok(self.graph.clone())
    }

    fn mean(&self) -> Result<Option<BlobProto>> {
        Ok(self.mean.clone())
    }
}

/// A loaded Caffe network bound to one math backend.
///
/// The model exclusively owns its weight and preprocessing tensors for its
/// lifetime. Activations produced during [`predict`] live in a per-call map
/// that is dropped when the call returns; only the returned tensor escapes.
/// Sharing a model between concurrent `predict` calls is safe only through
/// separate model instances.
///
/// [`predict`]: CaffeModel::predict
#[derive(Debug)]
pub struct CaffeModel<B: MathBackend> {
    backend: Arc<B>,
    variables: HashMap<String, Vec<Tensor>>,
    preprocess_offset: Option<Tensor>,
    preprocess_dim: Option<usize>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl<B: MathBackend> CaffeModel<B> {
    /// Loads a model from its resources.
    ///
    /// All three subtasks (weights, graph definition, optional external
    /// mean) must succeed; any failure aborts the load. Weights are
    /// converted to axis-normalized tensors once, here, and the dependency
    /// graph is built and validated eagerly.
    pub fn load(backend: Arc<B>, resources: &impl ModelResources) -> Result<Self> {
        let weights_net = resources.weights()?;
        let graph_net = resources.graph()?;
        let mean_blob = resources.mean()?;

        let variables = blob::weight_map(&weights_net)?;
        let mut preprocess_offset = blob::preprocess_offset(&weights_net)?;
        let preprocess_dim = blob::preprocess_dim(&weights_net);
        if let Some(mean) = mean_blob {
            // An external mean resource overrides inline mean values.
            preprocess_offset = Some(blob::blob_to_tensor(&mean)?);
        }

        let nodes = graph::build_nodes(&graph_net)?;
        let edges = graph::build_edges(&graph_net)?;

        debug!(
            backend = backend.name(),
            layers = nodes.len(),
            edges = edges.len(),
            weighted_layers = variables.len(),
            "model loaded"
        );

        Ok(CaffeModel {
            backend,
            variables,
            preprocess_offset,
            preprocess_dim,
            nodes,
            edges,
        })
    }

    /// Returns the preprocessing mean offset, if any.
    pub fn preprocess_offset(&self) -> Option<&Tensor> {
        self.preprocess_offset.as_ref()
    }

    /// Overrides the preprocessing mean offset.
    pub fn set_preprocess_offset(&mut self, offset: Option<Tensor>) {
        self.preprocess_offset = offset;
    }

    /// Returns the square crop/resize dimension, if any.
    pub fn preprocess_dim(&self) -> Option<usize> {
        self.preprocess_dim
    }

    /// Overrides the crop/resize dimension.
    pub fn set_preprocess_dim(&mut self, dim: Option<usize>) {
        self.preprocess_dim = dim;
    }

    /// Graph nodes in declaration (topological) order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Graph edges in resolution order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Runs a forward pass and returns the requested activation.
    ///
    /// The root node receives the externally supplied input after the fixed
    /// preprocessing pipeline (float cast, channel reversal, optional
    /// bilinear resize, optional mean subtraction). Each node is evaluated
    /// exactly once in dependency order; `on_step` observes every visited
    /// node. With `until` set, traversal stops after the named layer and its
    /// activation is returned; otherwise the final node's activation is.
    pub fn predict(
        &self,
        input: &Tensor,
        until: Option<&str>,
        mut on_step: Option<StepObserver<'_>>,
    ) -> Result<Tensor> {
        let backend = self.backend.as_ref();
        // Name-to-activation map for this call only; dropped on return so
        // every intermediate is released and only the result escapes.
        let mut activations: HashMap<String, Tensor> = HashMap::new();
        let mut last_name: Option<String> = None;

        graph::iterate_in_order(&self.nodes, &self.edges, until, |node, parents, index| {
            let weights = self.variables.get(&node.name).map(Vec::as_slice);

            let output = if index == 0 {
                let preprocessed = self.preprocess(input)?;
                perform_op(backend, OpInput::Single(&preprocessed), &node.layer, weights)?
            } else if parents.len() == 1 {
                let parent = resolve(&activations, &parents[0].name)?;
                perform_op(backend, OpInput::Single(parent), &node.layer, weights)?
            } else {
                let gathered = parents
                    .iter()
                    .map(|p| resolve(&activations, &p.name).cloned())
                    .collect::<Result<Vec<_>>>()?;
                perform_op(backend, OpInput::Many(&gathered), &node.layer, weights)?
            };

            if let Some(cb) = on_step.as_mut() {
                cb(&node.name, &node.layer, &output);
            }
            activations.insert(node.name.clone(), output);
            last_name = Some(node.name.clone());
            Ok(())
        })?;

        let Some(name) = last_name else {
            bail!("cannot predict on an empty graph");
        };
        // The returned activation becomes caller-owned; everything else in
        // the map is dropped here.
        Ok(activations
            .remove(&name)
            .expect("visited node must have a stored activation"))
    }

    /// Fixed root preprocessing, in order: cast, RGB-to-BGR reversal,
    /// resize, mean subtraction.
    fn preprocess(&self, input: &Tensor) -> Result<Tensor> {
        let backend = self.backend.as_ref();
        let mut x = backend.cast_f32(input)?;
        x = backend.reverse(&x, -1)?;
        if let Some(dim) = self.preprocess_dim {
            x = backend.resize_bilinear(&x, [dim, dim])?;
        }
        if let Some(offset) = &self.preprocess_offset {
            if !offset.is_empty() {
                x = backend.sub(&x, offset)?;
            }
        }
        Ok(x)
    }

    /// Releases all model-owned tensors.
    ///
    /// Dropping the model is equivalent; this spells out the lifecycle for
    /// callers porting from the legacy explicit-release interface.
    pub fn dispose(self) {}
}

fn resolve<'a>(activations: &'a HashMap<String, Tensor>, name: &str) -> Result<&'a Tensor> {
    activations
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("activation for parent '{}' was never produced", name))
}
