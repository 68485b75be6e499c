use crate::config::{resolve, Config};
use crate::functional::Activation;
use crate::graph::{concat, conv_out_extent, Param, Var};
use crate::init;
use crate::model::{expect_params, InputsHook, Model, ParamsHook, Source};
use crate::{Error, Result};
use tracing::debug;

// Cross-channel normalization constants (AlexNet).
const LRN_N: usize = 5;
const LRN_K: f32 = 2.0;
const LRN_ALPHA: f32 = 1e-4;
const LRN_BETA: f32 = 0.75;

/// AlexNet-style convolution block: strided 2-D convolution with numeric
/// symmetric padding, optional channel grouping, max pooling, and optional
/// local response normalization.
///
/// With `group == 2` the input channels and the filter count are each split
/// in half; two independent convolutions with independent `(W, b)` pairs
/// run on the two halves and their outputs are concatenated along the
/// channel axis, so the output channel count is still the full requested
/// filter count.
#[derive(Debug)]
pub struct ConvPool {
    input: Source<Var>,
    output: Var,
    params: Source<Vec<Param>>,
    input_shape: Vec<usize>,
    filter_shape: Vec<usize>,
    output_shape: Vec<usize>,
    group: usize,
}

impl ConvPool {
    pub fn builder() -> ConvPoolBuilder {
        ConvPoolBuilder::default()
    }
    pub fn defaults() -> Config {
        Config::new()
            .with("filter_shape", vec![96, 3, 11, 11])
            .with("conv_stride", 4)
            .with("pad", 0)
            .with("group", 1)
            .with("pool_size", 3)
            .with("pool_stride", 2)
            .with("bias_init", 0.0)
            .with("local_response_normalization", false)
            .with("activation", "rectifier")
            .with("weights_mean", 0.0)
            .with("weights_std", 0.01)
    }
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
    pub fn filter_shape(&self) -> &[usize] {
        &self.filter_shape
    }
    pub fn group(&self) -> usize {
        self.group
    }
}

impl Model for ConvPool {
    fn inputs(&self) -> Vec<Var> {
        vec![self.input.get().clone()]
    }
    fn outputs(&self) -> Var {
        self.output.clone()
    }
    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }
    fn params(&self) -> Vec<Param> {
        self.params.get().clone()
    }
}

#[derive(Default)]
pub struct ConvPoolBuilder {
    config: Option<Config>,
    inputs_hook: Option<InputsHook>,
    params_hook: Option<ParamsHook>,
    input_shape: Option<Vec<usize>>,
    filter_shape: Option<Vec<usize>>,
    conv_stride: Option<usize>,
    pad: Option<usize>,
    group: Option<usize>,
    pool_size: Option<usize>,
    pool_stride: Option<usize>,
    bias_init: Option<f32>,
    local_response_normalization: Option<bool>,
    activation: Option<String>,
    weights_mean: Option<f32>,
    weights_std: Option<f32>,
}

impl ConvPoolBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config.replace(config);
        self
    }
    pub fn inputs_hook(mut self, hook: impl Into<InputsHook>) -> Self {
        self.inputs_hook.replace(hook.into());
        self
    }
    /// Supplies `[W, b]` (group 1) or `[W0, b0, W1, b1]` (group 2) instead
    /// of allocating new parameters.
    pub fn params_hook(mut self, params: ParamsHook) -> Self {
        self.params_hook.replace(params);
        self
    }
    /// Input shape as (channels, rows, cols), without the batch axis.
    pub fn input_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.input_shape.replace(shape.into());
        self
    }
    /// Filter shape as (filters, channels, kernel rows, kernel cols). With
    /// `group == 2` the filters and channels are split across the groups.
    pub fn filter_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.filter_shape.replace(shape.into());
        self
    }
    pub fn conv_stride(mut self, stride: usize) -> Self {
        self.conv_stride.replace(stride);
        self
    }
    /// Symmetric zero padding per spatial side.
    pub fn pad(mut self, pad: usize) -> Self {
        self.pad.replace(pad);
        self
    }
    pub fn group(mut self, group: usize) -> Self {
        self.group.replace(group);
        self
    }
    /// Max-pooling window extent; 1 skips pooling entirely.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size.replace(size);
        self
    }
    pub fn pool_stride(mut self, stride: usize) -> Self {
        self.pool_stride.replace(stride);
        self
    }
    pub fn bias_init(mut self, value: f32) -> Self {
        self.bias_init.replace(value);
        self
    }
    pub fn local_response_normalization(mut self, enabled: bool) -> Self {
        self.local_response_normalization.replace(enabled);
        self
    }
    pub fn activation(mut self, name: impl Into<String>) -> Self {
        self.activation.replace(name.into());
        self
    }
    pub fn weights_mean(mut self, mean: f32) -> Self {
        self.weights_mean.replace(mean);
        self
    }
    pub fn weights_std(mut self, std: f32) -> Self {
        self.weights_std.replace(std);
        self
    }

    pub fn build(self) -> Result<ConvPool> {
        let defaults = ConvPool::defaults();
        let cfg = self.config.as_ref();

        let input_shape = match &self.inputs_hook {
            Some(hook) => hook.shape.clone(),
            None => resolve("input_shape", self.input_shape, cfg, &defaults)?,
        };
        if input_shape.len() != 3 || input_shape.iter().any(|&d| d == 0) {
            return Err(Error::InvalidOption {
                option: "input_shape".into(),
                reason: format!("expected 3 positive extents, got {input_shape:?}"),
            });
        }
        let input = match self.inputs_hook {
            Some(hook) => Source::Borrowed(hook.tensor),
            None => Source::Owned(Var::placeholder("x", 4)),
        };

        let filter_shape: Vec<usize> =
            resolve("filter_shape", self.filter_shape, cfg, &defaults)?;
        if filter_shape.len() != 4 || filter_shape.iter().any(|&d| d == 0) {
            return Err(Error::InvalidOption {
                option: "filter_shape".into(),
                reason: format!("expected 4 positive extents, got {filter_shape:?}"),
            });
        }
        if filter_shape[1] != input_shape[0] {
            return Err(Error::InvalidOption {
                option: "filter_shape".into(),
                reason: format!(
                    "expects {} input channels, the input has {}",
                    filter_shape[1], input_shape[0]
                ),
            });
        }
        let conv_stride: usize = resolve("conv_stride", self.conv_stride, cfg, &defaults)?;
        let pad: usize = resolve("pad", self.pad, cfg, &defaults)?;
        let group: usize = resolve("group", self.group, cfg, &defaults)?;
        if !(group == 1 || group == 2) {
            return Err(Error::InvalidGroup { group });
        }
        let pool_size: usize = resolve("pool_size", self.pool_size, cfg, &defaults)?;
        let pool_stride: usize = resolve("pool_stride", self.pool_stride, cfg, &defaults)?;
        let lrn_enabled: bool = resolve(
            "local_response_normalization",
            self.local_response_normalization,
            cfg,
            &defaults,
        )?;
        let activation: Activation =
            resolve::<String>("activation", self.activation, cfg, &defaults)?.parse()?;

        let channels = input_shape[0];
        let filters = filter_shape[0];
        if group == 2 && (filters % 2 != 0 || channels % 2 != 0) {
            return Err(Error::InvalidOption {
                option: "group".into(),
                reason: format!(
                    "group 2 requires even filter and channel counts, got {filters} filters \
                     over {channels} channels"
                ),
            });
        }

        let params = match self.params_hook {
            Some(hook) => Source::Borrowed(expect_params(hook, 2 * group, "ConvPool")?),
            None => {
                let mean: f32 = resolve("weights_mean", self.weights_mean, cfg, &defaults)?;
                let std: f32 = resolve("weights_std", self.weights_std, cfg, &defaults)?;
                let bias_init: f32 = resolve("bias_init", self.bias_init, cfg, &defaults)?;
                if group == 1 {
                    let w = init::gaussian_weights(&filter_shape, mean, std, "W")?;
                    Source::Owned(vec![w, init::bias(filters, bias_init, "b")])
                } else {
                    let half = [filters / 2, channels / 2, filter_shape[2], filter_shape[3]];
                    let w0 = init::gaussian_weights(&half, mean, std, "W0")?;
                    let w1 = init::gaussian_weights(&half, mean, std, "W1")?;
                    Source::Owned(vec![
                        w0,
                        init::bias(filters / 2, bias_init, "b0"),
                        w1,
                        init::bias(filters / 2, bias_init, "b1"),
                    ])
                }
            }
        };

        let x = input.get();
        let strides = [conv_stride, conv_stride];
        let pads = [pad, pad];
        let conved = if group == 1 {
            let w = Var::param(&params.get()[0]);
            let b = Var::param(&params.get()[1]);
            x.conv2d(&w, strides, pads).add_bias(&b, 1)
        } else {
            let w0 = Var::param(&params.get()[0]);
            let b0 = Var::param(&params.get()[1]);
            let w1 = Var::param(&params.get()[2]);
            let b1 = Var::param(&params.get()[3]);
            let lower = x
                .slice_axis(1, 0, channels / 2)
                .conv2d(&w0, strides, pads)
                .add_bias(&b0, 1);
            let upper = x
                .slice_axis(1, channels / 2, channels)
                .conv2d(&w1, strides, pads)
                .add_bias(&b1, 1);
            concat(&[lower, upper], 1)
        };
        let mut output = activation.apply(&conved);

        let mut oh = conv_out_extent(input_shape[1], filter_shape[2], pad, conv_stride)?;
        let mut ow = conv_out_extent(input_shape[2], filter_shape[3], pad, conv_stride)?;
        if pool_size != 1 {
            output = output.max_pool2d([pool_size, pool_size], [pool_stride, pool_stride]);
            oh = conv_out_extent(oh, pool_size, 0, pool_stride)?;
            ow = conv_out_extent(ow, pool_size, 0, pool_stride)?;
        }
        if lrn_enabled {
            output = output.lrn(LRN_N, LRN_K, LRN_ALPHA, LRN_BETA);
        }

        let output_shape = vec![filters, oh, ow];
        debug!(?input_shape, ?filter_shape, group, ?output_shape, "built conv pool layer");
        Ok(ConvPool {
            input,
            output,
            params,
            input_shape,
            filter_shape,
            output_shape,
            group,
        })
    }
}
