use layergraph::graph::{Function, Param};
use layergraph::layer::{Conv2d, ConvPool, DenoisingAutoencoder};
use layergraph::model::Model;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn seeded_params(rng: &mut SmallRng, input_size: usize, hidden_size: usize) -> Vec<Param> {
    let w = ArrayD::from_shape_fn(IxDyn(&[input_size, hidden_size]), |_| {
        rng.gen_range(-0.1..0.1)
    });
    vec![
        Param::new("W", w),
        Param::new("b0", ArrayD::zeros(IxDyn(&[input_size]))),
        Param::new("b1", ArrayD::zeros(IxDyn(&[hidden_size]))),
    ]
}

#[test]
fn convolution_stack_chains_by_construction() {
    let conv1 = Conv2d::builder()
        .input_shape(vec![1, 28, 28])
        .filter_shape(vec![8, 1, 5, 5])
        .build()
        .unwrap();
    let conv2 = Conv2d::builder()
        .inputs_hook(&conv1)
        .filter_shape(vec![16, 8, 3, 3])
        .border_mode("same")
        .build()
        .unwrap();
    let head = ConvPool::builder()
        .inputs_hook(&conv2)
        .filter_shape(vec![4, 16, 3, 3])
        .conv_stride(1)
        .pool_size(2)
        .pool_stride(2)
        .build()
        .unwrap();

    // each downstream input is the upstream output node itself
    assert!(conv2.inputs()[0].ptr_eq(&conv1.outputs()));
    assert!(head.inputs()[0].ptr_eq(&conv2.outputs()));
    assert_eq!(conv1.output_shape(), &[8, 24, 24]);
    assert_eq!(conv2.output_shape(), &[16, 24, 24]);
    assert_eq!(head.output_shape(), &[4, 11, 11]);

    // the whole stack evaluates end to end from the first placeholder
    let f = Function::new(conv1.inputs(), vec![head.outputs()]).unwrap();
    let out = f.call(&[ArrayD::ones(IxDyn(&[1, 1, 28, 28]))]).unwrap();
    assert_eq!(out[0].shape(), &[1, 4, 11, 11]);
}

#[test]
fn autoencoder_stack_shares_nothing_but_the_graph() {
    let first = DenoisingAutoencoder::builder()
        .input_size(8)
        .hidden_size(5)
        .corruption_level(0.0)
        .build()
        .unwrap();
    let second = DenoisingAutoencoder::builder()
        .inputs_hook(&first)
        .hidden_size(3)
        .corruption_level(0.0)
        .build()
        .unwrap();
    assert!(second.inputs()[0].ptr_eq(&first.outputs()));
    assert_eq!(second.input_size(), 8);
    // separate parameter sets
    for p in first.params() {
        assert!(!second.params().iter().any(|q| q.ptr_eq(&p)));
    }
    // the chained prediction graph evaluates from the first input
    let f = Function::new(first.inputs(), vec![second.outputs()]).unwrap();
    let out = f.call(&[ArrayD::from_elem(IxDyn(&[3, 8]), 0.5)]).unwrap();
    assert_eq!(out[0].shape(), &[3, 8]);
}

#[test]
fn params_hook_shares_parameters_between_layers() {
    let mut rng = SmallRng::seed_from_u64(7);
    let params = seeded_params(&mut rng, 6, 4);
    let first = DenoisingAutoencoder::builder()
        .input_size(6)
        .hidden_size(4)
        .corruption_level(0.0)
        .params_hook(params.clone())
        .build()
        .unwrap();
    let second = DenoisingAutoencoder::builder()
        .input_size(6)
        .hidden_size(4)
        .corruption_level(0.0)
        .params_hook(params.clone())
        .build()
        .unwrap();
    for (p, q) in first.params().iter().zip(second.params().iter()) {
        assert!(p.ptr_eq(q));
    }
    // updating through one handle is visible through the other
    first.params()[1].update(|b| b.fill(0.25));
    assert!(second.params()[1].value().iter().all(|&v| v == 0.25));
}

#[test]
fn gradient_descent_reduces_the_training_cost() {
    let mut rng = SmallRng::seed_from_u64(42);
    let params = seeded_params(&mut rng, 6, 4);
    let dae = DenoisingAutoencoder::builder()
        .input_size(6)
        .hidden_size(4)
        .corruption_level(0.0)
        .params_hook(params.clone())
        .build()
        .unwrap();
    let cost_fn = Function::new(dae.inputs(), vec![dae.train_cost().unwrap()]).unwrap();
    let batch = ArrayD::from_shape_fn(IxDyn(&[8, 6]), |ix| ((ix[0] + ix[1]) % 2) as f32);

    let initial = cost_fn.call(&[batch.clone()]).unwrap()[0].sum();
    let mut last = initial;
    for _ in 0..200 {
        let (value, grads) = cost_fn.grad(&[batch.clone()], &params).unwrap();
        last = value;
        for (param, grad) in params.iter().zip(&grads) {
            param.update(|value| value.scaled_add(-0.2, grad));
        }
    }
    assert!(
        last < initial,
        "cost did not decrease: {initial} -> {last}"
    );
}
