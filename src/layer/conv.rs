use crate::config::{resolve, Config};
use crate::functional::Activation;
use crate::graph::{conv_out_extent, Param, Var};
use crate::init::{self, UniformInterval, WeightInit};
use crate::model::{expect_params, InputsHook, Model, ParamsHook, Source};
use crate::{Error, Result};
use std::str::FromStr;
use tracing::debug;

/// Convolution edge handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorderMode {
    /// No padding; the output shrinks by `kernel - 1` per convolved axis.
    Valid,
    /// Zero padding of `kernel - 1` per side; the output grows.
    Full,
    /// Computed as `Full`, then centrally cropped back to the input
    /// extent with offset `(kernel - 1) / 2`.
    Same,
}

impl BorderMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Full => "full",
            Self::Same => "same",
        }
    }
    /// Symmetric zero padding applied per side for a kernel extent.
    fn pad(self, kernel: usize) -> usize {
        match self {
            Self::Valid => 0,
            Self::Full | Self::Same => kernel - 1,
        }
    }
    /// Output extent along one convolved axis.
    fn out_extent(self, input: usize, kernel: usize, stride: usize) -> Result<usize> {
        match self {
            Self::Valid => Ok(conv_out_extent(input, kernel, 0, stride)?),
            Self::Full => Ok(conv_out_extent(input, kernel, kernel - 1, stride)?),
            Self::Same => {
                let full = conv_out_extent(input, kernel, kernel - 1, stride)?;
                let shift = (kernel - 1) / 2;
                if full < shift + input {
                    return Err(Error::Graph(anyhow::anyhow!(
                        "same border mode cannot crop a full output of extent {} back to the \
                         input extent {} at offset {}; use stride 1",
                        full,
                        input,
                        shift
                    )));
                }
                Ok(input)
            }
        }
    }
}

impl FromStr for BorderMode {
    type Err = Error;
    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "valid" => Ok(Self::Valid),
            "full" => Ok(Self::Full),
            "same" => Ok(Self::Same),
            _ => Err(Error::InvalidBorderMode { name: name.into() }),
        }
    }
}

fn validate_shape(option: &str, shape: &[usize], expected: usize) -> Result<()> {
    if shape.len() != expected || shape.iter().any(|&d| d == 0) {
        return Err(Error::InvalidOption {
            option: option.into(),
            reason: format!("expected {expected} positive extents, got {shape:?}"),
        });
    }
    Ok(())
}

/// Allocates `[W, b]` for a convolution, or adopts them from a hook.
fn conv_params(
    layer: &'static str,
    hook: Option<ParamsHook>,
    filter_shape: &[usize],
    explicit: InitOptions,
    cfg: Option<&Config>,
    defaults: &Config,
) -> Result<Source<Vec<Param>>> {
    if let Some(hook) = hook {
        return Ok(Source::Borrowed(expect_params(hook, 2, layer)?));
    }
    let weights_init: WeightInit =
        resolve::<String>("weights_init", explicit.weights_init, cfg, defaults)?.parse()?;
    let w = match weights_init {
        WeightInit::Uniform => {
            let interval = UniformInterval::resolve(
                "weights_interval",
                explicit.weights_interval,
                cfg,
                defaults,
            )?;
            init::uniform_weights(filter_shape, interval, "W")?
        }
        WeightInit::Gaussian => {
            let mean = resolve("weights_mean", explicit.weights_mean, cfg, defaults)?;
            let std = resolve("weights_std", explicit.weights_std, cfg, defaults)?;
            init::gaussian_weights(filter_shape, mean, std, "W")?
        }
    };
    let bias_init: f32 = resolve("bias_init", explicit.bias_init, cfg, defaults)?;
    let b = init::bias(filter_shape[0], bias_init, "b");
    Ok(Source::Owned(vec![w, b]))
}

#[derive(Default)]
struct InitOptions {
    weights_init: Option<String>,
    weights_interval: Option<UniformInterval>,
    weights_mean: Option<f32>,
    weights_std: Option<f32>,
    bias_init: Option<f32>,
}

/// 1-D convolution over (batch, channels, length) inputs.
///
/// A feed-forward block: the output is `activation(conv(x, W) + b)` and no
/// training cost is defined here; a terminal layer attaches one.
pub struct Conv1d {
    input: Source<Var>,
    output: Var,
    params: Source<Vec<Param>>,
    input_shape: Vec<usize>,
    filter_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl Conv1d {
    pub fn builder() -> Conv1dBuilder {
        Conv1dBuilder::default()
    }
    pub fn defaults() -> Config {
        Config::new()
            .with("stride", 1)
            .with("border_mode", "valid")
            .with("activation", "rectifier")
            .with("weights_init", "uniform")
            .with("weights_interval", "montreal")
            .with("weights_mean", 0.0)
            .with("weights_std", 0.005)
            .with("bias_init", 0.0)
    }
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
    pub fn filter_shape(&self) -> &[usize] {
        &self.filter_shape
    }
}

impl Model for Conv1d {
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
pub struct Conv1dBuilder {
    config: Option<Config>,
    inputs_hook: Option<InputsHook>,
    params_hook: Option<ParamsHook>,
    input_shape: Option<Vec<usize>>,
    filter_shape: Option<Vec<usize>>,
    stride: Option<usize>,
    border_mode: Option<String>,
    activation: Option<String>,
    init: InitOptions,
}

impl Conv1dBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config.replace(config);
        self
    }
    pub fn inputs_hook(mut self, hook: impl Into<InputsHook>) -> Self {
        self.inputs_hook.replace(hook.into());
        self
    }
    /// Supplies `[W, b]` instead of allocating new parameters.
    pub fn params_hook(mut self, params: ParamsHook) -> Self {
        self.params_hook.replace(params);
        self
    }
    /// Input shape as (channels, length), without the batch axis.
    pub fn input_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.input_shape.replace(shape.into());
        self
    }
    /// Filter shape as (filters, channels, extent).
    pub fn filter_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.filter_shape.replace(shape.into());
        self
    }
    pub fn stride(mut self, stride: usize) -> Self {
        self.stride.replace(stride);
        self
    }
    pub fn border_mode(mut self, name: impl Into<String>) -> Self {
        self.border_mode.replace(name.into());
        self
    }
    pub fn activation(mut self, name: impl Into<String>) -> Self {
        self.activation.replace(name.into());
        self
    }
    pub fn weights_init(mut self, name: impl Into<String>) -> Self {
        self.init.weights_init.replace(name.into());
        self
    }
    pub fn weights_interval(mut self, interval: f32) -> Self {
        self.init
            .weights_interval
            .replace(UniformInterval::Explicit(interval));
        self
    }
    pub fn weights_mean(mut self, mean: f32) -> Self {
        self.init.weights_mean.replace(mean);
        self
    }
    pub fn weights_std(mut self, std: f32) -> Self {
        self.init.weights_std.replace(std);
        self
    }
    pub fn bias_init(mut self, value: f32) -> Self {
        self.init.bias_init.replace(value);
        self
    }

    pub fn build(self) -> Result<Conv1d> {
        let defaults = Conv1d::defaults();
        let cfg = self.config.as_ref();

        let input_shape = match &self.inputs_hook {
            Some(hook) => hook.shape.clone(),
            None => resolve("input_shape", self.input_shape, cfg, &defaults)?,
        };
        validate_shape("input_shape", &input_shape, 2)?;
        let input = match self.inputs_hook {
            Some(hook) => Source::Borrowed(hook.tensor),
            None => Source::Owned(Var::placeholder("x", 3)),
        };

        let filter_shape: Vec<usize> =
            resolve("filter_shape", self.filter_shape, cfg, &defaults)?;
        validate_shape("filter_shape", &filter_shape, 3)?;
        if filter_shape[1] != input_shape[0] {
            return Err(Error::InvalidOption {
                option: "filter_shape".into(),
                reason: format!(
                    "expects {} input channels, the input has {}",
                    filter_shape[1], input_shape[0]
                ),
            });
        }
        let stride: usize = resolve("stride", self.stride, cfg, &defaults)?;
        let border_mode: BorderMode =
            resolve::<String>("border_mode", self.border_mode, cfg, &defaults)?.parse()?;
        let activation: Activation =
            resolve::<String>("activation", self.activation, cfg, &defaults)?.parse()?;

        let kernel = filter_shape[2];
        let out_len = border_mode.out_extent(input_shape[1], kernel, stride)?;
        let params = conv_params(
            "Conv1d",
            self.params_hook,
            &filter_shape,
            self.init,
            cfg,
            &defaults,
        )?;
        let w = Var::param(&params.get()[0]);
        let b = Var::param(&params.get()[1]);

        let mut conved = input.get().conv1d(&w, stride, border_mode.pad(kernel));
        if border_mode == BorderMode::Same {
            let shift = (kernel - 1) / 2;
            conved = conved.slice_axis(2, shift, shift + input_shape[1]);
        }
        let output = activation.apply(&conved.add_bias(&b, 1));

        let output_shape = vec![filter_shape[0], out_len];
        debug!(?input_shape, ?filter_shape, ?output_shape, "built conv1d");
        Ok(Conv1d {
            input,
            output,
            params,
            input_shape,
            filter_shape,
            output_shape,
        })
    }
}

/// 2-D convolution over (batch, channels, rows, cols) inputs.
///
/// See [`Conv1d`]; the same contract with two convolved axes.
#[derive(Debug)]
pub struct Conv2d {
    input: Source<Var>,
    output: Var,
    params: Source<Vec<Param>>,
    input_shape: Vec<usize>,
    filter_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl Conv2d {
    pub fn builder() -> Conv2dBuilder {
        Conv2dBuilder::default()
    }
    pub fn defaults() -> Config {
        Config::new()
            .with("strides", vec![1, 1])
            .with("border_mode", "valid")
            .with("activation", "rectifier")
            .with("weights_init", "uniform")
            .with("weights_interval", "montreal")
            .with("weights_mean", 0.0)
            .with("weights_std", 0.005)
            .with("bias_init", 0.0)
    }
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
    pub fn filter_shape(&self) -> &[usize] {
        &self.filter_shape
    }
}

impl Model for Conv2d {
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
pub struct Conv2dBuilder {
    config: Option<Config>,
    inputs_hook: Option<InputsHook>,
    params_hook: Option<ParamsHook>,
    input_shape: Option<Vec<usize>>,
    filter_shape: Option<Vec<usize>>,
    strides: Option<Vec<usize>>,
    border_mode: Option<String>,
    activation: Option<String>,
    init: InitOptions,
}

impl Conv2dBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config.replace(config);
        self
    }
    pub fn inputs_hook(mut self, hook: impl Into<InputsHook>) -> Self {
        self.inputs_hook.replace(hook.into());
        self
    }
    /// Supplies `[W, b]` instead of allocating new parameters.
    pub fn params_hook(mut self, params: ParamsHook) -> Self {
        self.params_hook.replace(params);
        self
    }
    /// Input shape as (channels, rows, cols), without the batch axis.
    pub fn input_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.input_shape.replace(shape.into());
        self
    }
    /// Filter shape as (filters, channels, kernel rows, kernel cols).
    pub fn filter_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.filter_shape.replace(shape.into());
        self
    }
    pub fn strides(mut self, strides: impl Into<Vec<usize>>) -> Self {
        self.strides.replace(strides.into());
        self
    }
    pub fn border_mode(mut self, name: impl Into<String>) -> Self {
        self.border_mode.replace(name.into());
        self
    }
    pub fn activation(mut self, name: impl Into<String>) -> Self {
        self.activation.replace(name.into());
        self
    }
    pub fn weights_init(mut self, name: impl Into<String>) -> Self {
        self.init.weights_init.replace(name.into());
        self
    }
    pub fn weights_interval(mut self, interval: f32) -> Self {
        self.init
            .weights_interval
            .replace(UniformInterval::Explicit(interval));
        self
    }
    pub fn weights_mean(mut self, mean: f32) -> Self {
        self.init.weights_mean.replace(mean);
        self
    }
    pub fn weights_std(mut self, std: f32) -> Self {
        self.init.weights_std.replace(std);
        self
    }
    pub fn bias_init(mut self, value: f32) -> Self {
        self.init.bias_init.replace(value);
        self
    }

    pub fn build(self) -> Result<Conv2d> {
        let defaults = Conv2d::defaults();
        let cfg = self.config.as_ref();

        let input_shape = match &self.inputs_hook {
            Some(hook) => hook.shape.clone(),
            None => resolve("input_shape", self.input_shape, cfg, &defaults)?,
        };
        validate_shape("input_shape", &input_shape, 3)?;
        let input = match self.inputs_hook {
            Some(hook) => Source::Borrowed(hook.tensor),
            None => Source::Owned(Var::placeholder("x", 4)),
        };

        let filter_shape: Vec<usize> =
            resolve("filter_shape", self.filter_shape, cfg, &defaults)?;
        validate_shape("filter_shape", &filter_shape, 4)?;
        if filter_shape[1] != input_shape[0] {
            return Err(Error::InvalidOption {
                option: "filter_shape".into(),
                reason: format!(
                    "expects {} input channels, the input has {}",
                    filter_shape[1], input_shape[0]
                ),
            });
        }
        let strides: Vec<usize> = resolve("strides", self.strides, cfg, &defaults)?;
        if strides.len() != 2 || strides.iter().any(|&s| s == 0) {
            return Err(Error::InvalidOption {
                option: "strides".into(),
                reason: format!("expected 2 positive strides, got {strides:?}"),
            });
        }
        let border_mode: BorderMode =
            resolve::<String>("border_mode", self.border_mode, cfg, &defaults)?.parse()?;
        let activation: Activation =
            resolve::<String>("activation", self.activation, cfg, &defaults)?.parse()?;

        let (kh, kw) = (filter_shape[2], filter_shape[3]);
        let oh = border_mode.out_extent(input_shape[1], kh, strides[0])?;
        let ow = border_mode.out_extent(input_shape[2], kw, strides[1])?;
        let params = conv_params(
            "Conv2d",
            self.params_hook,
            &filter_shape,
            self.init,
            cfg,
            &defaults,
        )?;
        let w = Var::param(&params.get()[0]);
        let b = Var::param(&params.get()[1]);

        let mut conved = input.get().conv2d(
            &w,
            [strides[0], strides[1]],
            [border_mode.pad(kh), border_mode.pad(kw)],
        );
        if border_mode == BorderMode::Same {
            let shift_y = (kh - 1) / 2;
            let shift_x = (kw - 1) / 2;
            conved = conved
                .slice_axis(2, shift_y, shift_y + input_shape[1])
                .slice_axis(3, shift_x, shift_x + input_shape[2]);
        }
        let output = activation.apply(&conved.add_bias(&b, 1));

        let output_shape = vec![filter_shape[0], oh, ow];
        debug!(?input_shape, ?filter_shape, ?output_shape, "built conv2d");
        Ok(Conv2d {
            input,
            output,
            params,
            input_shape,
            filter_shape,
            output_shape,
        })
    }
}

/// 3-D convolution. Not implemented; construction fails with
/// [`Error::Unimplemented`].
#[derive(Debug)]
pub struct Conv3d {}

impl Conv3d {
    pub fn builder() -> Conv3dBuilder {
        Conv3dBuilder::default()
    }
}

#[derive(Default)]
pub struct Conv3dBuilder {}

impl Conv3dBuilder {
    pub fn build(self) -> Result<Conv3d> {
        Err(Error::Unimplemented("Conv3d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Function;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn border_mode_lookup() {
        assert_eq!("valid".parse::<BorderMode>().unwrap(), BorderMode::Valid);
        assert_eq!("Full".parse::<BorderMode>().unwrap(), BorderMode::Full);
        assert!(matches!(
            "weird".parse::<BorderMode>().unwrap_err(),
            Error::InvalidBorderMode { name } if name == "weird"
        ));
    }

    #[test]
    fn valid_mode_shrinks_by_kernel_minus_one() {
        let conv = Conv2d::builder()
            .input_shape(vec![1, 8, 8])
            .filter_shape(vec![4, 1, 3, 3])
            .build()
            .unwrap();
        assert_eq!(conv.output_shape(), &[4, 6, 6]);
        let params = conv.params();
        assert_eq!(params[0].shape(), &[4, 1, 3, 3]);
        assert_eq!(params[1].shape(), &[4]);
    }

    #[test]
    fn same_mode_preserves_extent_for_odd_and_even_kernels() {
        for kernel in [3usize, 4] {
            let conv = Conv2d::builder()
                .input_shape(vec![2, 8, 8])
                .filter_shape(vec![3, 2, kernel, kernel])
                .border_mode("same")
                .build()
                .unwrap();
            assert_eq!(conv.output_shape(), &[3, 8, 8], "kernel {kernel}");
        }
    }

    #[test]
    fn full_mode_grows_by_kernel_minus_one() {
        let conv = Conv2d::builder()
            .input_shape(vec![1, 5, 5])
            .filter_shape(vec![2, 1, 3, 3])
            .border_mode("full")
            .build()
            .unwrap();
        assert_eq!(conv.output_shape(), &[2, 7, 7]);
    }

    #[test]
    fn same_mode_output_has_the_input_extent_at_run_time() {
        let conv = Conv2d::builder()
            .input_shape(vec![1, 5, 5])
            .filter_shape(vec![2, 1, 3, 3])
            .border_mode("same")
            .build()
            .unwrap();
        let f = Function::new(conv.inputs(), vec![conv.outputs()]).unwrap();
        let out = f.call(&[ArrayD::ones(IxDyn(&[1, 1, 5, 5]))]).unwrap();
        assert_eq!(out[0].shape(), &[1, 2, 5, 5]);
    }

    #[test]
    fn wrong_params_hook_count_fails() {
        let param = || Param::new("p", ArrayD::zeros(IxDyn(&[2])));
        for count in [0usize, 1, 3, 4] {
            let hook: Vec<Param> = (0..count).map(|_| param()).collect();
            let err = Conv2d::builder()
                .input_shape(vec![1, 8, 8])
                .filter_shape(vec![4, 1, 3, 3])
                .params_hook(hook)
                .build()
                .unwrap_err();
            assert!(matches!(
                err,
                Error::InvalidParameterCount {
                    expected: 2,
                    found,
                    ..
                } if found == count
            ));
        }
    }

    #[test]
    fn params_hook_is_adopted_verbatim() {
        let w = Param::new("W", ArrayD::zeros(IxDyn(&[4, 1, 3, 3])));
        let b = Param::new("b", ArrayD::zeros(IxDyn(&[4])));
        let conv = Conv2d::builder()
            .input_shape(vec![1, 8, 8])
            .filter_shape(vec![4, 1, 3, 3])
            .params_hook(vec![w.clone(), b.clone()])
            .build()
            .unwrap();
        let params = conv.params();
        assert!(params[0].ptr_eq(&w));
        assert!(params[1].ptr_eq(&b));
    }

    #[test]
    fn missing_input_shape_fails() {
        let err = Conv2d::builder()
            .filter_shape(vec![4, 1, 3, 3])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingOption { option } if option == "input_shape"
        ));
    }

    #[test]
    fn channel_mismatch_fails() {
        let err = Conv2d::builder()
            .input_shape(vec![3, 8, 8])
            .filter_shape(vec![4, 1, 3, 3])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOption { option, .. } if option == "filter_shape"));
    }

    #[test]
    fn conv1d_valid_extent() {
        let conv = Conv1d::builder()
            .input_shape(vec![2, 10])
            .filter_shape(vec![3, 2, 3])
            .build()
            .unwrap();
        assert_eq!(conv.output_shape(), &[3, 8]);
        let f = Function::new(conv.inputs(), vec![conv.outputs()]).unwrap();
        let out = f.call(&[ArrayD::ones(IxDyn(&[1, 2, 10]))]).unwrap();
        assert_eq!(out[0].shape(), &[1, 3, 8]);
    }

    #[test]
    fn chaining_adopts_the_upstream_output_node() {
        let first = Conv2d::builder()
            .input_shape(vec![1, 12, 12])
            .filter_shape(vec![4, 1, 3, 3])
            .build()
            .unwrap();
        let second = Conv2d::builder()
            .inputs_hook(&first)
            .filter_shape(vec![6, 4, 3, 3])
            .build()
            .unwrap();
        assert!(second.inputs()[0].ptr_eq(&first.outputs()));
        assert_eq!(second.input_shape(), first.output_shape());
        assert_eq!(second.output_shape(), &[6, 8, 8]);
    }

    #[test]
    fn conv3d_is_unimplemented() {
        assert!(matches!(
            Conv3d::builder().build().unwrap_err(),
            Error::Unimplemented("Conv3d")
        ));
    }
}
