//! Symbolic tensor graph.
//!
//! A [`Var`] is a cheap handle to an immutable node in a deferred
//! computation graph: a placeholder, a parameter, a constant, or an
//! operation over other nodes. Nothing is evaluated until the graph is
//! compiled into a [`Function`] and invoked with concrete values.
//!
//! Node identity is pointer identity ([`Var::ptr_eq`]): a layer built from
//! an upstream layer's output refers to the very same node, not a copy.

use crate::functional::{Activation, Cost, Noise};
use ndarray::ArrayD;
use parking_lot::{Mutex, RwLock};
use std::fmt::{self, Debug};
use std::sync::Arc;

mod function;
pub use function::Function;
pub(crate) use function::conv_out_extent;

/// A shared, mutable parameter tensor.
///
/// Layers hold `Param` handles; an external training loop updates the
/// values in place through the same handles. The crate assumes a single
/// writer (see the concurrency notes in the crate docs).
#[derive(Clone)]
pub struct Param {
    name: Arc<str>,
    value: Arc<RwLock<ArrayD<f32>>>,
}

impl Param {
    pub fn new(name: impl Into<Arc<str>>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(RwLock::new(value)),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn shape(&self) -> Vec<usize> {
        self.value.read().shape().to_vec()
    }
    /// A snapshot of the current value.
    pub fn value(&self) -> ArrayD<f32> {
        self.value.read().clone()
    }
    /// Replaces the value.
    pub fn set(&self, value: ArrayD<f32>) {
        *self.value.write() = value;
    }
    /// Updates the value in place (the training-loop entry point).
    pub fn update(&self, f: impl FnOnce(&mut ArrayD<f32>)) {
        f(&mut self.value.write());
    }
    /// Whether two handles refer to the same underlying tensor.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("shape", &self.shape())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) enum Op {
    Placeholder {
        rank: usize,
    },
    Param(Param),
    Constant(ArrayD<f32>),
    /// 2-D matrix product.
    Dot,
    /// 2-D transpose.
    Transpose,
    /// Elementwise addition with trailing-axis broadcasting.
    Add,
    /// Adds a 1-D bias along `axis`, broadcast over every other axis.
    AddBias {
        axis: usize,
    },
    Activation(Activation),
    /// Stochastic corruption. The sampled elementwise derivative is kept so
    /// a backward pass sees the realization the forward pass used.
    Corrupt {
        noise: Noise,
        level: f32,
        mask: Mutex<Option<ArrayD<f32>>>,
    },
    Conv1d {
        stride: usize,
        pad: usize,
    },
    Conv2d {
        strides: [usize; 2],
        pads: [usize; 2],
    },
    SliceAxis {
        axis: usize,
        start: usize,
        end: usize,
    },
    Concat {
        axis: usize,
    },
    MaxPool2d {
        size: [usize; 2],
        strides: [usize; 2],
    },
    Lrn {
        n: usize,
        k: f32,
        alpha: f32,
        beta: f32,
    },
    /// Scalar mean cost of (output, target).
    Cost(Cost),
}

impl Op {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Placeholder { .. } => "placeholder",
            Self::Param(_) => "param",
            Self::Constant(_) => "constant",
            Self::Dot => "dot",
            Self::Transpose => "transpose",
            Self::Add => "add",
            Self::AddBias { .. } => "add_bias",
            Self::Activation(_) => "activation",
            Self::Corrupt { .. } => "corrupt",
            Self::Conv1d { .. } => "conv1d",
            Self::Conv2d { .. } => "conv2d",
            Self::SliceAxis { .. } => "slice_axis",
            Self::Concat { .. } => "concat",
            Self::MaxPool2d { .. } => "max_pool2d",
            Self::Lrn { .. } => "lrn",
            Self::Cost(_) => "cost",
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: Option<String>,
    pub(crate) op: Op,
    pub(crate) inputs: Vec<Var>,
}

/// A node in the symbolic graph.
#[derive(Clone)]
pub struct Var {
    node: Arc<Node>,
}

impl Var {
    fn from_op(op: Op, inputs: Vec<Var>) -> Self {
        Self {
            node: Arc::new(Node {
                name: None,
                op,
                inputs,
            }),
        }
    }
    /// A named symbolic input of the given rank, fed at call time.
    pub fn placeholder(name: impl Into<String>, rank: usize) -> Self {
        Self {
            node: Arc::new(Node {
                name: Some(name.into()),
                op: Op::Placeholder { rank },
                inputs: Vec::new(),
            }),
        }
    }
    /// A node reading a shared parameter.
    pub fn param(param: &Param) -> Self {
        Self::from_op(Op::Param(param.clone()), Vec::new())
    }
    /// A fixed tensor value.
    pub fn constant(value: ArrayD<f32>) -> Self {
        Self::from_op(Op::Constant(value), Vec::new())
    }
    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }
    /// Whether two handles refer to the same graph node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }
    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    /// Matrix product with `rhs` (both rank 2 at call time).
    pub fn dot(&self, rhs: &Var) -> Var {
        Var::from_op(Op::Dot, vec![self.clone(), rhs.clone()])
    }
    /// Matrix transpose.
    pub fn t(&self) -> Var {
        Var::from_op(Op::Transpose, vec![self.clone()])
    }
    /// Adds a 1-D bias along `axis`, broadcast over the remaining axes.
    pub fn add_bias(&self, bias: &Var, axis: usize) -> Var {
        Var::from_op(Op::AddBias { axis }, vec![self.clone(), bias.clone()])
    }
    pub(crate) fn activate(&self, activation: Activation) -> Var {
        Var::from_op(Op::Activation(activation), vec![self.clone()])
    }
    pub(crate) fn corrupt(&self, noise: Noise, level: f32) -> Var {
        Var::from_op(
            Op::Corrupt {
                noise,
                level,
                mask: Mutex::new(None),
            },
            vec![self.clone()],
        )
    }
    pub(crate) fn cost(cost: Cost, output: &Var, target: &Var) -> Var {
        Var::from_op(Op::Cost(cost), vec![output.clone(), target.clone()])
    }
    /// 1-D convolution of a (batch, channels, length) input with a
    /// (filters, channels, extent) weight, with symmetric zero padding.
    pub fn conv1d(&self, weight: &Var, stride: usize, pad: usize) -> Var {
        Var::from_op(Op::Conv1d { stride, pad }, vec![self.clone(), weight.clone()])
    }
    /// 2-D convolution of a (batch, channels, rows, cols) input with a
    /// (filters, channels, kh, kw) weight, with symmetric zero padding.
    pub fn conv2d(&self, weight: &Var, strides: [usize; 2], pads: [usize; 2]) -> Var {
        Var::from_op(
            Op::Conv2d { strides, pads },
            vec![self.clone(), weight.clone()],
        )
    }
    /// The sub-tensor `start..end` along `axis`.
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Var {
        Var::from_op(Op::SliceAxis { axis, start, end }, vec![self.clone()])
    }
    /// Max pooling over the two trailing spatial axes.
    pub fn max_pool2d(&self, size: [usize; 2], strides: [usize; 2]) -> Var {
        Var::from_op(Op::MaxPool2d { size, strides }, vec![self.clone()])
    }
    /// Local response normalization across channels (axis 1).
    pub fn lrn(&self, n: usize, k: f32, alpha: f32, beta: f32) -> Var {
        Var::from_op(Op::Lrn { n, k, alpha, beta }, vec![self.clone()])
    }
}

impl std::ops::Add<&Var> for &Var {
    type Output = Var;
    fn add(self, rhs: &Var) -> Var {
        Var::from_op(Op::Add, vec![self.clone(), rhs.clone()])
    }
}

/// Concatenates `parts` along `axis`.
pub fn concat(parts: &[Var], axis: usize) -> Var {
    Var::from_op(Op::Concat { axis }, parts.to_vec())
}

impl Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Var");
        builder.field("op", &self.node.op.name());
        if let Some(name) = self.name() {
            builder.field("name", &name);
        }
        builder.finish()
    }
}
