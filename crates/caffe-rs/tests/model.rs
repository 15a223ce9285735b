use std::sync::Arc;

use caffe_rs::graph::GraphError;
use caffe_rs::model::InMemoryResources;
use caffe_rs::proto::{BlobProto, BlobShape, LayerParameter, NetParameter};
use caffe_rs::tensor::{Shape, Tensor};
use caffe_rs::CaffeModel;
use caffe_rs_backend_ref_cpu::CpuMathBackend;

fn layer(name: &str, kind: &str, bottom: &[&str], top: &[&str]) -> LayerParameter {
    LayerParameter {
        name: name.to_string(),
        kind: kind.to_string(),
        bottom: bottom.iter().map(|s| s.to_string()).collect(),
        top: top.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn blob(dims: &[i64], data: Vec<f32>) -> BlobProto {
    BlobProto {
        shape: Some(BlobShape { dim: dims.to_vec() }),
        data,
        ..Default::default()
    }
}

fn net(layers: Vec<LayerParameter>) -> NetParameter {
    NetParameter {
        layer: layers,
        ..Default::default()
    }
}

/// Input feeding a 1x1 convolution with filter weight 2 and bias 1.
fn tiny_conv_resources() -> InMemoryResources {
    let mut conv = layer("conv1", "Convolution", &["data"], &["conv1"]);
    conv.blobs = vec![blob(&[1, 1, 1, 1], vec![2.0]), blob(&[1], vec![1.0])];
    let weights = net(vec![layer("data", "Input", &[], &["data"]), conv]);

    // The graph resource mirrors the topology without weight payloads.
    let graph = net(vec![
        layer("data", "Input", &[], &["data"]),
        layer("conv1", "Convolution", &["data"], &["conv1"]),
    ]);

    InMemoryResources {
        weights,
        graph,
        mean: None,
    }
}

#[test]
fn predict_runs_the_whole_graph() {
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &tiny_conv_resources()).unwrap();
    let input = Tensor::from_vec(Shape::new(vec![1, 1, 1]), vec![3.0]).unwrap();
    let y = model.predict(&input, None, None).unwrap();
    assert_eq!(y.shape().dims(), &[1, 1, 1]);
    assert_eq!(y.data(), &[7.0]);
}

#[test]
fn targeted_predict_of_the_last_layer_matches_the_full_pass() {
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &tiny_conv_resources()).unwrap();
    let input = Tensor::from_vec(Shape::new(vec![1, 1, 1]), vec![3.0]).unwrap();
    let full = model.predict(&input, None, None).unwrap();
    let targeted = model.predict(&input, Some("conv1"), None).unwrap();
    assert_eq!(full.data(), targeted.data());
}

#[test]
fn targeted_predict_stops_after_the_named_layer() {
    let graph = net(vec![
        layer("data", "Input", &[], &["data"]),
        layer("relu1", "ReLU", &["data"], &["relu1"]),
        layer("relu2", "ReLU", &["relu1"], &["relu2"]),
    ]);
    let resources = InMemoryResources {
        weights: NetParameter::default(),
        graph,
        mean: None,
    };
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &resources).unwrap();
    let input = Tensor::from_vec(Shape::new(vec![1, 1, 1]), vec![-2.0]).unwrap();

    let mut visited = Vec::new();
    let mut observer = |name: &str, _: &LayerParameter, _: &Tensor| {
        visited.push(name.to_string());
    };
    let y = model
        .predict(&input, Some("relu1"), Some(&mut observer))
        .unwrap();
    assert_eq!(visited, vec!["data", "relu1"]);
    assert_eq!(y.data(), &[0.0]);
}

#[test]
fn unknown_target_fails_before_any_evaluation() {
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &tiny_conv_resources()).unwrap();
    let input = Tensor::from_vec(Shape::new(vec![1, 1, 1]), vec![3.0]).unwrap();

    let mut steps = 0usize;
    let mut observer = |_: &str, _: &LayerParameter, _: &Tensor| steps += 1;
    let err = model
        .predict(&input, Some("missing"), Some(&mut observer))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::UnknownTarget(_))
    ));
    assert_eq!(steps, 0);
}

#[test]
fn preprocessing_reverses_channels_and_subtracts_the_mean() {
    let graph = net(vec![layer("data", "Input", &[], &["data"])]);
    let resources = InMemoryResources {
        weights: NetParameter::default(),
        graph,
        mean: None,
    };
    let mut model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &resources).unwrap();

    // 1x1 RGB pixel with a same-shape mean tensor.
    let mean = Tensor::from_vec(Shape::new(vec![1, 1, 3]), vec![1.0, 2.0, 3.0]).unwrap();
    model.set_preprocess_offset(Some(mean));
    let input =
        Tensor::from_u8(Shape::new(vec![1, 1, 3]), vec![10, 20, 30]).unwrap();
    let y = model.predict(&input, None, None).unwrap();
    // Channels reversed first (BGR), then the mean subtracted.
    assert_eq!(y.data(), &[29.0, 18.0, 7.0]);
}

#[test]
fn crop_dimension_resizes_the_input_before_the_first_layer() {
    let graph = net(vec![layer("data", "Input", &[], &["data"])]);
    let resources = InMemoryResources {
        weights: NetParameter::default(),
        graph,
        mean: None,
    };
    let mut model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &resources).unwrap();
    model.set_preprocess_dim(Some(2));

    let input = Tensor::from_vec(Shape::new(vec![4, 4, 1]), vec![1.0; 16]).unwrap();
    let y = model.predict(&input, None, None).unwrap();
    assert_eq!(y.shape().dims(), &[2, 2, 1]);
    assert_eq!(y.data(), &[1.0; 4]);
}

#[test]
fn external_mean_blob_overrides_inline_values() {
    let mut resources = tiny_conv_resources();
    resources.mean = Some(blob(&[3], vec![104.0, 117.0, 123.0]));
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &resources).unwrap();
    let offset = model.preprocess_offset().unwrap();
    assert_eq!(offset.shape().dims(), &[3]);
    assert_eq!(offset.data(), &[104.0, 117.0, 123.0]);
}

#[test]
fn branching_graph_concatenates_parent_activations_in_order() {
    // data fans out to two relus whose outputs meet in a concat.
    let graph = net(vec![
        layer("data", "Input", &[], &["data"]),
        layer("a", "ReLU", &["data"], &["a"]),
        layer("b", "ReLU", &["data"], &["b"]),
        layer("merge", "Concat", &["a", "b"], &["merge"]),
    ]);
    let resources = InMemoryResources {
        weights: NetParameter::default(),
        graph,
        mean: None,
    };
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &resources).unwrap();
    let input = Tensor::from_vec(Shape::new(vec![1, 1, 1]), vec![5.0]).unwrap();
    let y = model.predict(&input, None, None).unwrap();
    assert_eq!(y.shape().dims(), &[1, 1, 2]);
    assert_eq!(y.data(), &[5.0, 5.0]);
}

#[test]
fn load_rejects_graphs_with_unproduced_inputs() {
    let graph = net(vec![layer("conv1", "Convolution", &["ghost"], &["conv1"])]);
    let resources = InMemoryResources {
        weights: NetParameter::default(),
        graph,
        mean: None,
    };
    let err = CaffeModel::load(Arc::new(CpuMathBackend::new()), &resources).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::MissingProducer { .. })
    ));
}

#[test]
fn dispose_consumes_the_model() {
    let model = CaffeModel::load(Arc::new(CpuMathBackend::new()), &tiny_conv_resources()).unwrap();
    model.dispose();
}
