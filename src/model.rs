use crate::graph::{Param, Var};
use crate::{Error, Result};

/// The contract every layer implements.
///
/// An optimizer or a downstream layer interacts with a layer only through
/// these accessors; it never inspects the layer's implementation. All
/// methods are pure accessors returning tensors and handles stored at
/// construction time.
pub trait Model {
    /// The symbolic input tensor(s) of the layer.
    fn inputs(&self) -> Vec<Var>;
    /// The hidden representation, for layers that have one.
    fn hiddens(&self) -> Option<Var> {
        None
    }
    /// The symbolic output tensor.
    fn outputs(&self) -> Var;
    /// The shape of the output, without the batch axis. Downstream layers
    /// adopt this through an [`InputsHook`].
    fn output_shape(&self) -> &[usize];
    /// The layer's parameter handles, in a fixed per-layer order.
    fn params(&self) -> Vec<Param>;
    /// The scalar training cost, for trainable layers.
    fn train_cost(&self) -> Option<Var> {
        None
    }
}

/// Hands an upstream layer's output to a new layer as its input.
///
/// The receiving layer adopts `shape` for its size-dependent parameter
/// allocation and wires `tensor` in directly instead of allocating a fresh
/// placeholder, so the graph is chained by construction.
#[derive(Clone, Debug)]
pub struct InputsHook {
    /// Output shape of the upstream layer, without the batch axis.
    pub shape: Vec<usize>,
    /// The upstream output node.
    pub tensor: Var,
}

impl InputsHook {
    pub fn new(shape: impl Into<Vec<usize>>, tensor: Var) -> Self {
        Self {
            shape: shape.into(),
            tensor,
        }
    }
}

impl From<(Vec<usize>, Var)> for InputsHook {
    fn from((shape, tensor): (Vec<usize>, Var)) -> Self {
        Self::new(shape, tensor)
    }
}

impl<M: Model> From<&M> for InputsHook {
    fn from(model: &M) -> Self {
        Self::new(model.output_shape().to_vec(), model.outputs())
    }
}

/// Hands a caller-supplied hidden representation to a generative layer.
///
/// Only the prediction path honors this: the layer decodes from `tensor`
/// instead of encoding its input first. The training path always computes
/// hiddens from the (noised) input, since a training cost needs an
/// input-conditioned hidden state.
#[derive(Clone, Debug)]
pub struct HiddensHook {
    /// Number of hidden units.
    pub size: usize,
    /// The hidden tensor to decode from.
    pub tensor: Var,
}

impl HiddensHook {
    pub fn new(size: usize, tensor: Var) -> Self {
        Self { size, tensor }
    }
}

impl From<(usize, Var)> for HiddensHook {
    fn from((size, tensor): (usize, Var)) -> Self {
        Self::new(size, tensor)
    }
}

/// An ordered sequence of parameters handed to a layer instead of letting
/// it allocate its own. Length and order are fixed per layer type and
/// validated at construction.
pub type ParamsHook = Vec<Param>;

/// Provenance of a tensor or parameter slot: allocated by the layer itself,
/// or received through a hook and merely wired in.
#[derive(Clone, Debug)]
pub enum Source<T> {
    Owned(T),
    Borrowed(T),
}

impl<T> Source<T> {
    pub fn get(&self) -> &T {
        match self {
            Self::Owned(value) | Self::Borrowed(value) => value,
        }
    }
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Self::Borrowed(_))
    }
}

/// Validates a params hook against the layer's required count.
pub(crate) fn expect_params(
    hook: ParamsHook,
    expected: usize,
    layer: &'static str,
) -> Result<Vec<Param>> {
    if hook.len() != expected {
        return Err(Error::InvalidParameterCount {
            layer,
            expected,
            found: hook.len(),
        });
    }
    Ok(hook)
}
