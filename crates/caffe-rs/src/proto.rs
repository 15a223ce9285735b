//! Decoded Caffe network description.
//!
//! Wire decoding itself (protobuf binary, prototxt text) is an external
//! collaborator; this module defines the structured parameter object those
//! decoders produce. All structs deserialize from camel-case keys, and
//! [`snake_to_camel`] normalizes raw value trees coming from decoders that
//! keep the original snake-case field names.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Top-level network description shared by the weight and graph resources.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetParameter {
    pub name: String,
    /// Net-level input blob declarations (older prototxt style).
    #[serde(deserialize_with = "one_or_many")]
    pub input: Vec<String>,
    /// Current wire format layer list.
    #[serde(deserialize_with = "one_or_many")]
    pub layer: Vec<LayerParameter>,
    /// Legacy wire format layer list.
    #[serde(deserialize_with = "one_or_many")]
    pub layers: Vec<LayerParameter>,
}

impl NetParameter {
    /// Returns whichever of the two alternate layer-list fields is populated.
    ///
    /// The legacy format stored layers under `layers`, the current one under
    /// `layer`; downstream code only ever goes through this accessor.
    pub fn ordered_layers(&self) -> &[LayerParameter] {
        if !self.layer.is_empty() {
            &self.layer
        } else {
            &self.layers
        }
    }

    /// Deserializes a decoded value tree, normalizing snake-case keys first.
    pub fn from_value(value: Value) -> Result<NetParameter> {
        serde_json::from_value(snake_to_camel(value))
            .context("failed to interpret decoded network description")
    }
}

/// One layer of the network: type tag, connections, parameters and weights.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Input blob names.
    #[serde(deserialize_with = "one_or_many")]
    pub bottom: Vec<String>,
    /// Output blob names.
    #[serde(deserialize_with = "one_or_many")]
    pub top: Vec<String>,
    /// Associated weight blobs, already in declaration order.
    #[serde(deserialize_with = "one_or_many")]
    pub blobs: Vec<BlobProto>,
    pub transform_param: Option<TransformationParameter>,
    pub convolution_param: Option<ConvolutionParameter>,
    pub inner_product_param: Option<InnerProductParameter>,
    pub pooling_param: Option<PoolingParameter>,
    pub batch_norm_param: Option<BatchNormParameter>,
    pub lrn_param: Option<LrnParameter>,
    pub scale_param: Option<ScaleParameter>,
    pub softmax_param: Option<SoftmaxParameter>,
}

/// Serialized multi-dimensional weight buffer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlobProto {
    pub shape: Option<BlobShape>,
    #[serde(deserialize_with = "one_or_many")]
    pub data: Vec<f32>,
    // Legacy fixed dimension fields, used when `shape` is absent.
    pub num: Option<i64>,
    pub channels: Option<i64>,
    pub height: Option<i64>,
    pub width: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlobShape {
    #[serde(deserialize_with = "one_or_many")]
    pub dim: Vec<i64>,
}

/// Input transformation block carried by the first layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformationParameter {
    pub crop_size: Option<u32>,
    #[serde(deserialize_with = "one_or_many")]
    pub mean_value: Vec<f32>,
    pub mean_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvolutionParameter {
    pub num_output: Option<u32>,
    pub bias_term: Option<bool>,
    pub pad: Option<NumParam>,
    pub kernel_size: Option<NumParam>,
    pub stride: Option<NumParam>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InnerProductParameter {
    pub num_output: Option<u32>,
    pub bias_term: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolingParameter {
    pub pool: Option<PoolParam>,
    pub kernel_size: Option<NumParam>,
    pub kernel_h: Option<f64>,
    pub kernel_w: Option<f64>,
    pub stride: Option<NumParam>,
    pub stride_h: Option<f64>,
    pub stride_w: Option<f64>,
    pub pad: Option<NumParam>,
    pub global_pooling: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchNormParameter {
    pub eps: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LrnParameter {
    pub local_size: Option<u32>,
    pub alpha: Option<f32>,
    pub beta: Option<f32>,
    pub k: Option<f32>,
    pub norm_region: Option<NormRegionParam>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleParameter {
    pub bias_term: Option<bool>,
    pub axis: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftmaxParameter {
    pub axis: Option<i64>,
}

/// Numeric parameter that may be encoded as a scalar or a repeated field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumParam {
    Scalar(f64),
    List(Vec<f64>),
}

/// Pool method, either the numeric wire enum or a string tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PoolParam {
    Index(i64),
    Tag(String),
}

/// LRN normalization region, either the numeric wire enum or a string tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NormRegionParam {
    Index(i64),
    Tag(String),
}

/// Accepts either a bare value or a list where the wire format repeats fields.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Recursively camelizes every object key of a decoded value tree.
///
/// Prototxt decoders emit snake-case keys (`kernel_size`); the structured
/// model uses the camel-case names the binary schema exposes.
pub fn snake_to_camel(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(snake_to_camel).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (camelize(&key), snake_to_camel(value)))
                .collect(),
        ),
        other => other,
    }
}

fn camelize(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, part) in key.split('_').enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}
