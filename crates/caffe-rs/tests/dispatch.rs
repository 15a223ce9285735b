use caffe_rs::layer::{perform_op, LayerError, OpInput};
use caffe_rs::proto::{
    InnerProductParameter, LayerParameter, LrnParameter, NumParam, PoolingParameter,
    ScaleParameter, SoftmaxParameter,
};
use caffe_rs::tensor::{Shape, Tensor};
use caffe_rs_backend_ref_cpu::CpuMathBackend;

fn t(dims: Vec<usize>, values: Vec<f32>) -> Tensor {
    Tensor::from_vec(Shape::new(dims), values).unwrap()
}

fn layer(name: &str, kind: &str) -> LayerParameter {
    LayerParameter {
        name: name.to_string(),
        kind: kind.to_string(),
        ..Default::default()
    }
}

#[test]
fn input_and_dropout_pass_through_unchanged() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 2], vec![1.5, -2.5]);
    for kind in ["Input", "Dropout"] {
        let y = perform_op(&backend, OpInput::Single(&x), &layer("l", kind), None).unwrap();
        assert_eq!(y.data(), x.data());
        assert_eq!(y.shape().dims(), x.shape().dims());
    }
}

#[test]
fn unknown_layer_type_is_a_fatal_typed_error() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1], vec![1.0]);
    let err = perform_op(
        &backend,
        OpInput::Single(&x),
        &layer("deconv1", "Deconvolution"),
        None,
    )
    .unwrap_err();
    match err.downcast_ref::<LayerError>() {
        Some(LayerError::UnsupportedLayer { layer }) => {
            assert_eq!(layer.name, "deconv1");
            assert_eq!(layer.kind, "Deconvolution");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn inner_product_applies_weight_and_bias() {
    let backend = CpuMathBackend::new();
    // Input flattens to [2]; weight is [I=2, O=2].
    let x = t(vec![1, 1, 2], vec![1.0, 2.0]);
    let weights = vec![
        t(vec![2, 2], vec![1.0, 3.0, 2.0, 4.0]),
        t(vec![2], vec![10.0, 20.0]),
    ];
    let y = perform_op(
        &backend,
        OpInput::Single(&x),
        &layer("fc1", "InnerProduct"),
        Some(&weights),
    )
    .unwrap();
    // y_o = sum_i w[i][o] * x_i + b_o.
    assert_eq!(y.data(), &[15.0, 31.0]);
}

#[test]
fn inner_product_without_bias_term_skips_the_second_blob() {
    let backend = CpuMathBackend::new();
    let x = t(vec![2], vec![1.0, 1.0]);
    let weights = vec![t(vec![2, 1], vec![2.0, 3.0])];
    let mut fc = layer("fc1", "InnerProduct");
    fc.inner_product_param = Some(InnerProductParameter {
        bias_term: Some(false),
        ..Default::default()
    });
    let y = perform_op(&backend, OpInput::Single(&x), &fc, Some(&weights)).unwrap();
    assert_eq!(y.data(), &[5.0]);
}

#[test]
fn inner_product_missing_weights_is_reported() {
    let backend = CpuMathBackend::new();
    let x = t(vec![2], vec![1.0, 1.0]);
    let err = perform_op(
        &backend,
        OpInput::Single(&x),
        &layer("fc1", "InnerProduct"),
        None,
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayerError>(),
        Some(LayerError::MissingWeights { index: 0, .. })
    ));
}

#[test]
fn convolution_uses_stride_one_and_no_padding_by_default() {
    let backend = CpuMathBackend::new();
    let x = t(vec![2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let weights = vec![
        // 2x2 single-filter kernel of ones plus a bias of 1.
        t(vec![2, 2, 1, 1], vec![1.0; 4]),
        t(vec![1], vec![1.0]),
    ];
    let y = perform_op(
        &backend,
        OpInput::Single(&x),
        &layer("conv1", "Convolution"),
        Some(&weights),
    )
    .unwrap();
    assert_eq!(y.shape().dims(), &[1, 1, 1]);
    assert_eq!(y.data(), &[11.0]);
}

#[test]
fn pooling_defaults_to_a_unit_max_window() {
    let backend = CpuMathBackend::new();
    // No kernel or stride declared: window 1x1, stride 1, identity result.
    let x = t(vec![2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let mut pool = layer("pool1", "Pooling");
    pool.pooling_param = Some(PoolingParameter::default());
    let y = perform_op(&backend, OpInput::Single(&x), &pool, None).unwrap();
    assert_eq!(y.shape().dims(), &[2, 2, 1]);
    assert_eq!(y.data(), x.data());
}

#[test]
fn global_pooling_covers_the_whole_spatial_extent() {
    let backend = CpuMathBackend::new();
    let x = t(vec![2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let mut pool = layer("pool1", "Pooling");
    pool.pooling_param = Some(PoolingParameter {
        global_pooling: Some(true),
        // Declared kernel must be ignored under global pooling.
        kernel_size: Some(NumParam::Scalar(1.0)),
        ..Default::default()
    });
    let y = perform_op(&backend, OpInput::Single(&x), &pool, None).unwrap();
    assert_eq!(y.shape().dims(), &[1, 1, 1]);
    assert_eq!(y.data(), &[4.0]);
}

#[test]
fn scale_multiplies_and_optionally_adds_bias() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 2], vec![2.0, 3.0]);
    let weights = vec![t(vec![2], vec![10.0, 100.0]), t(vec![2], vec![1.0, -1.0])];

    let mut scale = layer("scale1", "Scale");
    let y = perform_op(&backend, OpInput::Single(&x), &scale, Some(&weights)).unwrap();
    assert_eq!(y.data(), &[20.0, 300.0]);

    scale.scale_param = Some(ScaleParameter {
        bias_term: Some(true),
        ..Default::default()
    });
    let y = perform_op(&backend, OpInput::Single(&x), &scale, Some(&weights)).unwrap();
    assert_eq!(y.data(), &[21.0, 299.0]);
}

#[test]
fn batch_norm_uses_default_epsilon() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 1], vec![5.0]);
    let weights = vec![t(vec![1], vec![1.0]), t(vec![1], vec![4.0])];
    let y = perform_op(
        &backend,
        OpInput::Single(&x),
        &layer("bn1", "BatchNorm"),
        Some(&weights),
    )
    .unwrap();
    // (5 - 1) / sqrt(4 + 1e-5), within float tolerance of 2.
    assert!((y.data()[0] - 2.0).abs() < 1e-4);
}

#[test]
fn lrn_divides_alpha_by_local_size() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 1], vec![2.0]);
    let mut lrn = layer("norm1", "LRN");
    lrn.lrn_param = Some(LrnParameter {
        local_size: Some(5),
        alpha: Some(1.0),
        beta: Some(1.0),
        ..Default::default()
    });
    let y = perform_op(&backend, OpInput::Single(&x), &lrn, None).unwrap();
    // Effective alpha 1/5: 2 / (1 + 0.2 * 4).
    assert!((y.data()[0] - 2.0 / 1.8).abs() < 1e-5);
}

#[test]
fn lrn_zero_radius_falls_back_to_two() {
    let backend = CpuMathBackend::new();
    // local_size 1 would give radius 0; the fallback widens the window to
    // cover every channel of this pixel.
    let x = t(vec![1, 1, 3], vec![3.0, 4.0, 0.0]);
    let mut lrn = layer("norm1", "LRN");
    lrn.lrn_param = Some(LrnParameter {
        local_size: Some(1),
        alpha: Some(2.0),
        beta: Some(1.0),
        ..Default::default()
    });
    let y = perform_op(&backend, OpInput::Single(&x), &lrn, None).unwrap();
    // Shared energy 25, alpha 2/1: each channel divides by 1 + 50.
    assert!((y.data()[0] - 3.0 / 51.0).abs() < 1e-5);
    assert!((y.data()[1] - 4.0 / 51.0).abs() < 1e-5);
    assert!((y.data()[2] - 0.0).abs() < 1e-5);
}

#[test]
fn lrn_zero_alpha_falls_back_to_one_with_default_beta() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 1], vec![2.0]);
    let mut lrn = layer("norm1", "LRN");
    lrn.lrn_param = Some(LrnParameter {
        local_size: Some(5),
        alpha: Some(0.0),
        ..Default::default()
    });
    let y = perform_op(&backend, OpInput::Single(&x), &lrn, None).unwrap();
    // Alpha resolves to 1, beta to 0.75, k to 1: 2 / (1 + 4)^0.75.
    assert!((y.data()[0] - 2.0 / 5.0f32.powf(0.75)).abs() < 1e-5);
}

#[test]
fn prelu_reads_alpha_from_weights() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 2], vec![-4.0, 4.0]);
    let weights = vec![t(vec![2], vec![0.25, 0.5])];
    let y = perform_op(
        &backend,
        OpInput::Single(&x),
        &layer("prelu1", "PReLU"),
        Some(&weights),
    )
    .unwrap();
    assert_eq!(y.data(), &[-1.0, 4.0]);
}

#[test]
fn softmax_accepts_negative_axes() {
    let backend = CpuMathBackend::new();
    let x = t(vec![1, 1, 2], vec![0.0, 0.0]);
    let mut softmax = layer("prob", "Softmax");
    softmax.softmax_param = Some(SoftmaxParameter { axis: Some(-1) });
    let y = perform_op(&backend, OpInput::Single(&x), &softmax, None).unwrap();
    assert_eq!(y.data(), &[0.5, 0.5]);

    softmax.softmax_param = Some(SoftmaxParameter { axis: Some(5) });
    assert!(perform_op(&backend, OpInput::Single(&x), &softmax, None).is_err());
}

#[test]
fn concat_folds_inputs_pairwise_over_channels() {
    let backend = CpuMathBackend::new();
    let inputs = vec![
        t(vec![1, 1, 1], vec![1.0]),
        t(vec![1, 1, 2], vec![2.0, 3.0]),
        t(vec![1, 1, 1], vec![4.0]),
    ];
    let y = perform_op(
        &backend,
        OpInput::Many(&inputs),
        &layer("inception", "Concat"),
        None,
    )
    .unwrap();
    assert_eq!(y.shape().dims(), &[1, 1, 4]);
    assert_eq!(y.data(), &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn single_input_layers_reject_multiple_parents() {
    let backend = CpuMathBackend::new();
    let inputs = vec![t(vec![1], vec![1.0]), t(vec![1], vec![2.0])];
    assert!(perform_op(
        &backend,
        OpInput::Many(&inputs),
        &layer("relu1", "ReLU"),
        None
    )
    .is_err());
}
