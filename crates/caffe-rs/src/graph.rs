//! Dependency graph derived from layer blob connections.
//!
//! Nodes come from the ordered layer list; edges match each consumed blob
//! name to its most recent preceding producer. Declaration order is the
//! topological order the format guarantees, so traversal walks the list in
//! order rather than re-sorting; structural problems (duplicate names,
//! consumers without a producer) are rejected eagerly when the graph is
//! built, not left undefined at predict time.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use thiserror::Error;

use crate::proto::{LayerParameter, NetParameter};

/// One graph node, unique by layer name.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub layer: LayerParameter,
}

/// Directed producer-to-consumer link between two named nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate layer name '{0}'")]
    DuplicateName(String),
    #[error("no producer found for blob '{blob}' consumed by layer '{layer}'")]
    MissingProducer { blob: String, layer: String },
    #[error("target layer '{0}' does not exist in the graph")]
    UnknownTarget(String),
    #[error("edge source '{src}' of node '{dst}' is not in the node list")]
    UnknownSource { src: String, dst: String },
}

/// Wraps each layer in a node, enforcing name uniqueness.
pub fn build_nodes(net: &NetParameter) -> Result<Vec<Node>> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(net.ordered_layers().len());
    for layer in net.ordered_layers() {
        if !seen.insert(layer.name.clone()) {
            bail!(GraphError::DuplicateName(layer.name.clone()));
        }
        nodes.push(Node {
            name: layer.name.clone(),
            layer: layer.clone(),
        });
    }
    Ok(nodes)
}

/// Derives edges by matching consumed blob names to their producers.
///
/// The producer of a name is the most recent preceding layer whose output
/// list contains it. Because a layer's own outputs are registered only after
/// its inputs are resolved, an in-place layer (input name equal to output
/// name) links to the prior producer of that name and never to itself.
/// Blob names declared as net-level inputs bind to the external input and
/// produce no edge.
pub fn build_edges(net: &NetParameter) -> Result<Vec<Edge>> {
    let mut producers: HashMap<&str, &str> = HashMap::new();
    let mut edges = Vec::new();

    for layer in net.ordered_layers() {
        for bottom in &layer.bottom {
            if let Some(src) = producers.get(bottom.as_str()) {
                edges.push(Edge {
                    src: (*src).to_string(),
                    dst: layer.name.clone(),
                });
            } else if !net.input.contains(bottom) {
                bail!(GraphError::MissingProducer {
                    blob: bottom.clone(),
                    layer: layer.name.clone(),
                });
            }
        }
        for top in &layer.top {
            producers.insert(top.as_str(), layer.name.as_str());
        }
    }
    Ok(edges)
}

/// Visits nodes in declaration order, handing each visit its parent nodes in
/// edge order along with the visit index.
///
/// When `until` names a node, traversal stops immediately after visiting it;
/// every preceding node is still visited, so nothing the target depends on is
/// skipped. An unknown target is a fatal error rather than a silent full
/// pass.
pub fn iterate_in_order<'a, F>(
    nodes: &'a [Node],
    edges: &[Edge],
    until: Option<&str>,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&'a Node, &[&'a Node], usize) -> Result<()>,
{
    let by_name: HashMap<&str, &Node> =
        nodes.iter().map(|node| (node.name.as_str(), node)).collect();

    if let Some(target) = until {
        if !by_name.contains_key(target) {
            bail!(GraphError::UnknownTarget(target.to_string()));
        }
    }

    for (index, node) in nodes.iter().enumerate() {
        let parents: Vec<&Node> = edges
            .iter()
            .filter(|edge| edge.dst == node.name)
            .map(|edge| {
                by_name
                    .get(edge.src.as_str())
                    .copied()
                    .ok_or_else(|| GraphError::UnknownSource {
                        src: edge.src.clone(),
                        dst: edge.dst.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;
        visit(node, &parents, index)?;
        if until == Some(node.name.as_str()) {
            return Ok(());
        }
    }
    Ok(())
}
