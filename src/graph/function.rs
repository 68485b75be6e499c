use super::{Op, Param, Var};
use anyhow::{bail, ensure, Result};
use ndarray::{Array3, Array4, ArrayD, Axis, Ix2, Ix3, Ix4, IxDyn, Slice};
use std::collections::{hash_map::Entry, HashMap, HashSet};

/// A compiled callable from declared input nodes to declared output nodes.
///
/// Construction walks the graph once: it checks that every reachable
/// placeholder is fed and records a topological evaluation order. Calls
/// reuse that order with a per-call memo table, so a `Function` built once
/// at layer construction is cheap to invoke many times.
#[derive(Debug)]
pub struct Function {
    inputs: Vec<Var>,
    outputs: Vec<Var>,
    order: Vec<Var>,
}

impl Function {
    /// Compiles the graph reachable from `outputs`, treating `inputs` as
    /// fed at call time.
    ///
    /// **Errors**
    ///
    /// If a placeholder is reachable from `outputs` but not listed in
    /// `inputs`.
    pub fn new(inputs: Vec<Var>, outputs: Vec<Var>) -> Result<Self> {
        let fed: HashSet<usize> = inputs.iter().map(Var::id).collect();
        let order = topological_order(&outputs, &fed);
        for var in &order {
            if let Op::Placeholder { .. } = var.node().op {
                if !fed.contains(&var.id()) {
                    bail!(
                        "placeholder {:?} is reachable from the outputs but not bound as an input",
                        var.name().unwrap_or("<unnamed>")
                    );
                }
            }
        }
        Ok(Self {
            inputs,
            outputs,
            order,
        })
    }
    pub fn inputs(&self) -> &[Var] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[Var] {
        &self.outputs
    }
    /// Evaluates the outputs for concrete input values.
    pub fn call(&self, args: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
        let values = self.forward(args)?;
        Ok(self
            .outputs
            .iter()
            .map(|out| values[&out.id()].clone())
            .collect())
    }
    /// Evaluates the single scalar output and its gradients with respect to
    /// `params`, by reverse accumulation through the recorded order.
    ///
    /// Returns the scalar value and one gradient array per requested
    /// parameter (zero if the output does not depend on it).
    ///
    /// **Errors**
    ///
    /// If the function does not have exactly one scalar output, or an
    /// operation on the path does not define a gradient.
    pub fn grad(&self, args: &[ArrayD<f32>], params: &[Param]) -> Result<(f32, Vec<ArrayD<f32>>)> {
        ensure!(
            self.outputs.len() == 1,
            "gradient requires exactly one output, this function has {}",
            self.outputs.len()
        );
        let output = &self.outputs[0];
        let values = self.forward(args)?;
        let out_value = &values[&output.id()];
        ensure!(
            out_value.ndim() == 0,
            "gradient requires a scalar output, got shape {:?}",
            out_value.shape()
        );
        let fed: HashSet<usize> = self.inputs.iter().map(Var::id).collect();
        let mut grads: HashMap<usize, ArrayD<f32>> = HashMap::new();
        grads.insert(output.id(), ArrayD::ones(IxDyn(&[])));
        for var in self.order.iter().rev() {
            let Some(grad) = grads.get(&var.id()).cloned() else {
                continue;
            };
            if fed.contains(&var.id()) {
                continue;
            }
            let node = var.node();
            if node.inputs.is_empty() {
                continue;
            }
            let input_values: Vec<&ArrayD<f32>> = node
                .inputs
                .iter()
                .map(|input| &values[&input.id()])
                .collect();
            let input_grads = backward_op(&node.op, &input_values, &values[&var.id()], &grad)?;
            for (input, input_grad) in node.inputs.iter().zip(input_grads) {
                if let Some(g) = input_grad {
                    match grads.entry(input.id()) {
                        Entry::Occupied(mut entry) => {
                            let acc = entry.get_mut();
                            *acc = &*acc + &g;
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(g);
                        }
                    }
                }
            }
        }
        let mut param_grads = Vec::with_capacity(params.len());
        for param in params {
            let mut acc = ArrayD::zeros(IxDyn(&param.shape()));
            for var in &self.order {
                if let Op::Param(p) = &var.node().op {
                    if p.ptr_eq(param) {
                        if let Some(g) = grads.get(&var.id()) {
                            acc = &acc + g;
                        }
                    }
                }
            }
            param_grads.push(acc);
        }
        Ok((out_value.sum(), param_grads))
    }

    fn forward(&self, args: &[ArrayD<f32>]) -> Result<HashMap<usize, ArrayD<f32>>> {
        ensure!(
            args.len() == self.inputs.len(),
            "expected {} arguments, got {}",
            self.inputs.len(),
            args.len()
        );
        let mut values: HashMap<usize, ArrayD<f32>> = HashMap::new();
        for (var, arg) in self.inputs.iter().zip(args) {
            if let Op::Placeholder { rank } = &var.node().op {
                ensure!(
                    arg.ndim() == *rank,
                    "placeholder {:?} expects rank {}, got rank {}",
                    var.name().unwrap_or("<unnamed>"),
                    rank,
                    arg.ndim()
                );
            }
            values.insert(var.id(), arg.clone());
        }
        for var in &self.order {
            if values.contains_key(&var.id()) {
                continue;
            }
            let node = var.node();
            let value = match &node.op {
                Op::Param(param) => param.value(),
                Op::Constant(value) => value.clone(),
                Op::Placeholder { .. } => bail!(
                    "placeholder {:?} was not fed",
                    var.name().unwrap_or("<unnamed>")
                ),
                op => {
                    let input_values: Vec<&ArrayD<f32>> = node
                        .inputs
                        .iter()
                        .map(|input| &values[&input.id()])
                        .collect();
                    eval_op(op, &input_values)?
                }
            };
            values.insert(var.id(), value);
        }
        Ok(values)
    }
}

/// Post-order over the graph reachable from `outputs`, stopping at fed
/// nodes: every node appears after all of its inputs.
fn topological_order(outputs: &[Var], fed: &HashSet<usize>) -> Vec<Var> {
    let mut order = Vec::new();
    let mut opened = HashSet::new();
    let mut emitted = HashSet::new();
    let mut stack: Vec<(Var, bool)> = outputs.iter().map(|v| (v.clone(), false)).collect();
    while let Some((var, expanded)) = stack.pop() {
        let id = var.id();
        if expanded {
            if emitted.insert(id) {
                order.push(var);
            }
            continue;
        }
        if !opened.insert(id) {
            continue;
        }
        stack.push((var.clone(), true));
        if !fed.contains(&id) {
            for input in &var.node().inputs {
                if !opened.contains(&input.id()) {
                    stack.push((input.clone(), false));
                }
            }
        }
    }
    order
}

/// Output extent of a convolution/pooling window: `(n + 2*pad - k) / stride + 1`.
pub(crate) fn conv_out_extent(
    n: usize,
    k: usize,
    pad: usize,
    stride: usize,
) -> anyhow::Result<usize> {
    ensure!(stride > 0, "stride must be positive");
    let padded = n + 2 * pad;
    ensure!(
        padded >= k,
        "kernel extent {} exceeds padded input extent {}",
        k,
        padded
    );
    Ok((padded - k) / stride + 1)
}

fn eval_op(op: &Op, inputs: &[&ArrayD<f32>]) -> anyhow::Result<ArrayD<f32>> {
    match op {
        Op::Dot => {
            let lhs = inputs[0].view().into_dimensionality::<Ix2>()?;
            let rhs = inputs[1].view().into_dimensionality::<Ix2>()?;
            ensure!(
                lhs.ncols() == rhs.nrows(),
                "invalid shapes for dot: {:?} and {:?}",
                lhs.shape(),
                rhs.shape()
            );
            Ok(lhs.dot(&rhs).into_dyn())
        }
        Op::Transpose => {
            ensure!(
                inputs[0].ndim() == 2,
                "transpose expects rank 2, got {:?}",
                inputs[0].shape()
            );
            Ok(inputs[0].view().reversed_axes().to_owned())
        }
        Op::Add => broadcast_add(inputs[0], inputs[1]),
        Op::AddBias { axis } => {
            let x = inputs[0];
            let bias = inputs[1];
            ensure!(
                bias.ndim() == 1 && *axis < x.ndim() && bias.len() == x.shape()[*axis],
                "cannot add bias of shape {:?} along axis {} of {:?}",
                bias.shape(),
                axis,
                x.shape()
            );
            let mut shape = vec![1; x.ndim()];
            shape[*axis] = bias.len();
            let bias = bias.view().into_shape(IxDyn(&shape))?;
            Ok(&x.view() + &bias)
        }
        Op::Activation(activation) => Ok(inputs[0].mapv(|x| activation.eval(x))),
        Op::Corrupt { noise, level, mask } => {
            let (corrupted, sampled_mask) = noise.corrupt(inputs[0], *level);
            *mask.lock() = Some(sampled_mask);
            Ok(corrupted)
        }
        Op::Conv1d { stride, pad } => conv1d(inputs[0], inputs[1], *stride, *pad),
        Op::Conv2d { strides, pads } => conv2d(inputs[0], inputs[1], *strides, *pads),
        Op::SliceAxis { axis, start, end } => {
            let x = inputs[0];
            ensure!(
                *axis < x.ndim() && start <= end && *end <= x.shape()[*axis],
                "cannot slice {}..{} along axis {} of {:?}",
                start,
                end,
                axis,
                x.shape()
            );
            Ok(x
                .slice_axis(Axis(*axis), Slice::from(*start..*end))
                .to_owned())
        }
        Op::Concat { axis } => {
            let views: Vec<_> = inputs.iter().map(|x| x.view()).collect();
            Ok(ndarray::concatenate(Axis(*axis), &views)?)
        }
        Op::MaxPool2d { size, strides } => max_pool2d(inputs[0], *size, *strides),
        Op::Lrn { n, k, alpha, beta } => lrn(inputs[0], *n, *k, *alpha, *beta),
        Op::Cost(cost) => cost.eval(inputs[0], inputs[1]),
        Op::Placeholder { .. } | Op::Param(_) | Op::Constant(_) => {
            bail!("{} nodes are not evaluated as operations", op.name())
        }
    }
}

fn backward_op(
    op: &Op,
    inputs: &[&ArrayD<f32>],
    output: &ArrayD<f32>,
    grad: &ArrayD<f32>,
) -> anyhow::Result<Vec<Option<ArrayD<f32>>>> {
    match op {
        Op::Dot => {
            let lhs = inputs[0].view().into_dimensionality::<Ix2>()?;
            let rhs = inputs[1].view().into_dimensionality::<Ix2>()?;
            let grad = grad.view().into_dimensionality::<Ix2>()?;
            Ok(vec![
                Some(grad.dot(&rhs.t()).into_dyn()),
                Some(lhs.t().dot(&grad).into_dyn()),
            ])
        }
        Op::Transpose => Ok(vec![Some(grad.view().reversed_axes().to_owned())]),
        Op::Add => Ok(vec![
            Some(reduce_to(grad, inputs[0].shape())),
            Some(reduce_to(grad, inputs[1].shape())),
        ]),
        Op::AddBias { axis } => {
            let mut bias_grad = grad.clone();
            for ax in (0..grad.ndim()).rev() {
                if ax != *axis {
                    bias_grad = bias_grad.sum_axis(Axis(ax));
                }
            }
            Ok(vec![Some(grad.clone()), Some(bias_grad)])
        }
        Op::Activation(activation) => {
            let mut input_grad = grad.clone();
            for ((g, &x), &y) in input_grad
                .iter_mut()
                .zip(inputs[0].iter())
                .zip(output.iter())
            {
                *g *= activation.grad(x, y);
            }
            Ok(vec![Some(input_grad)])
        }
        Op::Corrupt { mask, .. } => {
            let mask = mask
                .lock()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("corrupt backward before forward"))?;
            Ok(vec![Some(grad * &mask)])
        }
        Op::SliceAxis { axis, start, end } => {
            let mut input_grad = ArrayD::zeros(inputs[0].raw_dim());
            input_grad
                .slice_axis_mut(Axis(*axis), Slice::from(*start..*end))
                .assign(grad);
            Ok(vec![Some(input_grad)])
        }
        Op::Concat { axis } => {
            let mut offset = 0;
            let mut input_grads = Vec::with_capacity(inputs.len());
            for input in inputs {
                let extent = input.shape()[*axis];
                input_grads.push(Some(
                    grad.slice_axis(Axis(*axis), Slice::from(offset..offset + extent))
                        .to_owned(),
                ));
                offset += extent;
            }
            Ok(input_grads)
        }
        Op::Cost(cost) => {
            let scale = grad.sum();
            Ok(vec![
                Some(cost.grad_output(inputs[0], inputs[1]) * scale),
                // The target operand never carries parameters in this crate.
                None,
            ])
        }
        Op::Conv1d { .. } | Op::Conv2d { .. } | Op::MaxPool2d { .. } | Op::Lrn { .. } => {
            bail!("no gradient defined for {}", op.name())
        }
        Op::Placeholder { .. } | Op::Param(_) | Op::Constant(_) => Ok(Vec::new()),
    }
}

/// Reduces a broadcasted gradient back to `shape` by summing the
/// broadcast axes.
fn reduce_to(grad: &ArrayD<f32>, shape: &[usize]) -> ArrayD<f32> {
    let mut g = grad.clone();
    while g.ndim() > shape.len() {
        g = g.sum_axis(Axis(0));
    }
    for i in 0..shape.len() {
        if shape[i] == 1 && g.shape()[i] != 1 {
            g = g.sum_axis(Axis(i)).insert_axis(Axis(i));
        }
    }
    g
}

fn broadcast_add(lhs: &ArrayD<f32>, rhs: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
    if lhs.shape() == rhs.shape() {
        return Ok(lhs + rhs);
    }
    if let Some(rhs) = rhs.broadcast(lhs.raw_dim()) {
        return Ok(&lhs.view() + &rhs);
    }
    if let Some(lhs) = lhs.broadcast(rhs.raw_dim()) {
        return Ok(&lhs + &rhs.view());
    }
    bail!(
        "cannot broadcast {:?} with {:?} for add",
        lhs.shape(),
        rhs.shape()
    )
}

fn conv1d(x: &ArrayD<f32>, w: &ArrayD<f32>, stride: usize, pad: usize) -> anyhow::Result<ArrayD<f32>> {
    let x = x.view().into_dimensionality::<Ix3>()?;
    let w = w.view().into_dimensionality::<Ix3>()?;
    let (batch, channels, len) = x.dim();
    let (filters, w_channels, kernel) = w.dim();
    ensure!(
        channels == w_channels,
        "conv1d input has {} channels but the filter expects {}",
        channels,
        w_channels
    );
    let out_len = conv_out_extent(len, kernel, pad, stride)?;
    let mut out = Array3::<f32>::zeros((batch, filters, out_len));
    for b in 0..batch {
        for f in 0..filters {
            for o in 0..out_len {
                let mut acc = 0.0;
                for c in 0..channels {
                    for k in 0..kernel {
                        let i = (o * stride + k) as isize - pad as isize;
                        if i >= 0 && (i as usize) < len {
                            acc += x[[b, c, i as usize]] * w[[f, c, k]];
                        }
                    }
                }
                out[[b, f, o]] = acc;
            }
        }
    }
    Ok(out.into_dyn())
}

fn conv2d(
    x: &ArrayD<f32>,
    w: &ArrayD<f32>,
    strides: [usize; 2],
    pads: [usize; 2],
) -> anyhow::Result<ArrayD<f32>> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let w = w.view().into_dimensionality::<Ix4>()?;
    let (batch, channels, height, width) = x.dim();
    let (filters, w_channels, kh, kw) = w.dim();
    ensure!(
        channels == w_channels,
        "conv2d input has {} channels but the filter expects {}",
        channels,
        w_channels
    );
    let [sh, sw] = strides;
    let [ph, pw] = pads;
    let oh = conv_out_extent(height, kh, ph, sh)?;
    let ow = conv_out_extent(width, kw, pw, sw)?;
    let mut out = Array4::<f32>::zeros((batch, filters, oh, ow));
    for b in 0..batch {
        for f in 0..filters {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = 0.0;
                    for c in 0..channels {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = (oy * sh + ky) as isize - ph as isize;
                                let ix = (ox * sw + kx) as isize - pw as isize;
                                if iy >= 0
                                    && (iy as usize) < height
                                    && ix >= 0
                                    && (ix as usize) < width
                                {
                                    acc += x[[b, c, iy as usize, ix as usize]] * w[[f, c, ky, kx]];
                                }
                            }
                        }
                    }
                    out[[b, f, oy, ox]] = acc;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

fn max_pool2d(
    x: &ArrayD<f32>,
    size: [usize; 2],
    strides: [usize; 2],
) -> anyhow::Result<ArrayD<f32>> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let (batch, channels, height, width) = x.dim();
    let [wh, ww] = size;
    let [sh, sw] = strides;
    let oh = conv_out_extent(height, wh, 0, sh)?;
    let ow = conv_out_extent(width, ww, 0, sw)?;
    let mut out = Array4::<f32>::zeros((batch, channels, oh, ow));
    for b in 0..batch {
        for c in 0..channels {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = f32::NEG_INFINITY;
                    for ky in 0..wh {
                        for kx in 0..ww {
                            best = best.max(x[[b, c, oy * sh + ky, ox * sw + kx]]);
                        }
                    }
                    out[[b, c, oy, ox]] = best;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

fn lrn(x: &ArrayD<f32>, n: usize, k: f32, alpha: f32, beta: f32) -> anyhow::Result<ArrayD<f32>> {
    let x = x.view().into_dimensionality::<Ix4>()?;
    let (batch, channels, height, width) = x.dim();
    ensure!(n > 0, "lrn window must be positive");
    let half = n / 2;
    let mut out = Array4::<f32>::zeros(x.raw_dim());
    for b in 0..batch {
        for c in 0..channels {
            let lo = c.saturating_sub(half);
            let hi = (c + half).min(channels - 1);
            for y in 0..height {
                for xx in 0..width {
                    let mut sum = 0.0;
                    for j in lo..=hi {
                        let v = x[[b, j, y, xx]];
                        sum += v * v;
                    }
                    let denom = (k + alpha / n as f32 * sum).powf(beta);
                    out[[b, c, y, xx]] = x[[b, c, y, xx]] / denom;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2, ArrayD};

    fn matrix(rows: usize, cols: usize, scale: f32) -> ArrayD<f32> {
        ArrayD::from_shape_fn(IxDyn(&[rows, cols]), |ix| {
            scale * (1.0 + ix[0] as f32 + 0.5 * ix[1] as f32)
        })
    }

    #[test]
    fn dot_add_bias_evaluates() {
        let x = Var::placeholder("x", 2);
        let w = Param::new("w", arr2(&[[1.0f32, 0.0], [0.0, 2.0]]).into_dyn());
        let b = Param::new("b", arr1(&[1.0f32, -1.0]).into_dyn());
        let y = &x.dot(&Var::param(&w)) + &Var::param(&b);
        let f = Function::new(vec![x], vec![y]).unwrap();
        let out = f
            .call(&[arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn()])
            .unwrap();
        assert_eq!(out[0], arr2(&[[2.0f32, 3.0], [4.0, 7.0]]).into_dyn());
    }

    #[test]
    fn transpose_round_trip() {
        let x = Var::placeholder("x", 2);
        let f = Function::new(vec![x.clone()], vec![x.t().t()]).unwrap();
        let input = matrix(3, 2, 1.0);
        assert_eq!(f.call(&[input.clone()]).unwrap()[0], input);
    }

    #[test]
    fn unbound_placeholder_is_rejected() {
        let x = Var::placeholder("x", 2);
        let y = Var::placeholder("y", 2);
        let sum = &x + &y;
        assert!(Function::new(vec![x], vec![sum]).is_err());
    }

    #[test]
    fn placeholder_rank_is_checked() {
        let x = Var::placeholder("x", 2);
        let f = Function::new(vec![x.clone()], vec![x]).unwrap();
        let err = f
            .call(&[ArrayD::zeros(IxDyn(&[2, 2, 2]))])
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("rank"));
    }

    #[test]
    fn conv2d_valid_hand_computed() {
        let x = Var::placeholder("x", 4);
        let w = Param::new(
            "w",
            ArrayD::from_shape_vec(IxDyn(&[1, 1, 2, 2]), vec![1.0f32, 0.0, 0.0, 1.0]).unwrap(),
        );
        let y = x.conv2d(&Var::param(&w), [1, 1], [0, 0]);
        let f = Function::new(vec![x], vec![y]).unwrap();
        let input = ArrayD::from_shape_vec(
            IxDyn(&[1, 1, 3, 3]),
            vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();
        let out = f.call(&[input]).unwrap();
        // each output is x[i][j] + x[i+1][j+1]
        assert_eq!(
            out[0],
            ArrayD::from_shape_vec(IxDyn(&[1, 1, 2, 2]), vec![6.0f32, 8.0, 12.0, 14.0]).unwrap()
        );
    }

    #[test]
    fn full_padding_grows_output() {
        let x = Var::placeholder("x", 4);
        let w = Param::new("w", ArrayD::ones(IxDyn(&[1, 1, 3, 3])));
        let y = x.conv2d(&Var::param(&w), [1, 1], [2, 2]);
        let f = Function::new(vec![x], vec![y]).unwrap();
        let out = f.call(&[ArrayD::ones(IxDyn(&[1, 1, 4, 4]))]).unwrap();
        assert_eq!(out[0].shape(), &[1, 1, 6, 6]);
        // corner sees exactly one input element, center sees all nine
        assert_relative_eq!(out[0][[0, 0, 0, 0]], 1.0);
        assert_relative_eq!(out[0][[0, 0, 3, 3]], 9.0);
    }

    #[test]
    fn max_pool_takes_window_maxima() {
        let x = Var::placeholder("x", 4);
        let y = x.max_pool2d([2, 2], [2, 2]);
        let f = Function::new(vec![x], vec![y]).unwrap();
        let input = ArrayD::from_shape_vec(
            IxDyn(&[1, 1, 4, 4]),
            (0..16).map(|i| i as f32).collect(),
        )
        .unwrap();
        let out = f.call(&[input]).unwrap();
        assert_eq!(
            out[0],
            ArrayD::from_shape_vec(IxDyn(&[1, 1, 2, 2]), vec![5.0f32, 7.0, 13.0, 15.0]).unwrap()
        );
    }

    #[test]
    fn slice_and_concat_round_trip() {
        let x = Var::placeholder("x", 4);
        let lo = x.slice_axis(1, 0, 2);
        let hi = x.slice_axis(1, 2, 4);
        let back = crate::graph::concat(&[lo, hi], 1);
        let f = Function::new(vec![x], vec![back]).unwrap();
        let input = ArrayD::from_shape_fn(IxDyn(&[2, 4, 3, 3]), |ix| {
            (ix[0] * 100 + ix[1] * 10 + ix[2] + ix[3]) as f32
        });
        assert_eq!(f.call(&[input.clone()]).unwrap()[0], input);
    }

    #[test]
    fn gradients_match_finite_differences() {
        use crate::functional::{Activation, Cost};
        let x = Var::placeholder("x", 2);
        let w = Param::new(
            "w",
            arr2(&[[0.1f32, -0.2], [0.3, 0.1], [-0.1, 0.2]]).into_dyn(),
        );
        let b = Param::new("b", arr1(&[0.05f32, -0.05]).into_dyn());
        let y = Activation::Tanh.apply(&(&x.dot(&Var::param(&w)) + &Var::param(&b)));
        let target = Var::constant(arr2(&[[0.2f32, -0.1], [0.0, 0.3]]).into_dyn());
        let cost = Cost::MeanSquaredError.apply(&y, &target);
        let f = Function::new(vec![x], vec![cost]).unwrap();
        let input = arr2(&[[0.5f32, -0.3, 0.8], [0.2, 0.7, -0.5]]).into_dyn();

        let (value, grads) = f.grad(&[input.clone()], &[w.clone(), b.clone()]).unwrap();
        assert!(value > 0.0);

        for (param, grad) in [(&w, &grads[0]), (&b, &grads[1])] {
            assert_eq!(grad.shape(), param.shape().as_slice());
            let base = param.value();
            for (index, &g) in grad.indexed_iter() {
                let eps = 1e-3;
                let mut plus = base.clone();
                plus[&index] += eps;
                param.set(plus);
                let up = f.call(&[input.clone()]).unwrap()[0].sum();
                let mut minus = base.clone();
                minus[&index] -= eps;
                param.set(minus);
                let down = f.call(&[input.clone()]).unwrap()[0].sum();
                param.set(base.clone());
                let numeric = (up - down) / (2.0 * eps);
                assert_relative_eq!(g, numeric, max_relative = 0.05, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn tied_weight_gradients_accumulate_both_uses() {
        use crate::functional::Cost;
        // y = (x . W) . W^T, so dCost/dW has contributions from both uses.
        let x = Var::placeholder("x", 2);
        let w = Param::new("w", arr2(&[[0.4f32, 0.1], [-0.2, 0.3]]).into_dyn());
        let w_var = Var::param(&w);
        let y = x.dot(&w_var).dot(&w_var.t());
        let target = Var::constant(arr2(&[[0.0f32, 1.0]]).into_dyn());
        let cost = Cost::MeanSquaredError.apply(&y, &target);
        let f = Function::new(vec![x], vec![cost]).unwrap();
        let input = arr2(&[[1.0f32, -0.5]]).into_dyn();
        let (_, grads) = f.grad(&[input.clone()], &[w.clone()]).unwrap();
        let base = w.value();
        for (index, &g) in grads[0].indexed_iter() {
            let eps = 1e-3;
            let mut plus = base.clone();
            plus[&index] += eps;
            w.set(plus);
            let up = f.call(&[input.clone()]).unwrap()[0].sum();
            let mut minus = base.clone();
            minus[&index] -= eps;
            w.set(minus);
            let down = f.call(&[input.clone()]).unwrap()[0].sum();
            w.set(base.clone());
            assert_relative_eq!(g, (up - down) / (2.0 * eps), max_relative = 0.05, epsilon = 1e-4);
        }
    }

    #[test]
    fn conv_gradient_is_an_explicit_error() {
        use crate::functional::Cost;
        let x = Var::placeholder("x", 4);
        let w = Param::new("w", ArrayD::ones(IxDyn(&[1, 1, 2, 2])));
        let y = x.conv2d(&Var::param(&w), [1, 1], [0, 0]);
        let target = Var::constant(ArrayD::zeros(IxDyn(&[1, 1, 2, 2])));
        let cost = Cost::MeanSquaredError.apply(&y, &target);
        let f = Function::new(vec![x], vec![cost]).unwrap();
        let err = f
            .grad(&[ArrayD::ones(IxDyn(&[1, 1, 3, 3]))], &[w])
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("no gradient"));
    }
}
