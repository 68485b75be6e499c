use crate::config::{resolve, Config};
use crate::functional::{Activation, Cost, Noise};
use crate::graph::{Function, Param, Var};
use crate::init::{self, UniformInterval, WeightInit};
use crate::model::{expect_params, HiddensHook, InputsHook, Model, ParamsHook, Source};
use crate::Result;
use ndarray::ArrayD;
use tracing::debug;

/// A denoising autoencoder: corrupts its input, encodes it, and learns to
/// reconstruct the original from the corrupted version.
///
/// The encode and decode sides share one weight matrix (the decode side
/// uses its transpose), plus a visible and a hidden bias vector. Training
/// always encodes from the corrupted input; prediction encodes from the
/// clean input, or decodes directly from a hidden tensor supplied through a
/// [`HiddensHook`].
#[derive(Debug)]
pub struct DenoisingAutoencoder {
    input: Source<Var>,
    hiddens: Source<Var>,
    output: Var,
    train_cost: Var,
    params: Source<Vec<Param>>,
    predictor: Function,
    input_size: usize,
    hidden_size: usize,
    output_shape: Vec<usize>,
}

impl DenoisingAutoencoder {
    pub fn builder() -> DenoisingAutoencoderBuilder {
        DenoisingAutoencoderBuilder::default()
    }
    /// The layer's default options. Sized for MNIST, as the canonical demo.
    pub fn defaults() -> Config {
        Config::new()
            .with("input_size", 28 * 28)
            .with("hidden_size", 1000)
            .with("corruption_level", 0.4)
            .with("noise", "salt_and_pepper")
            .with("hidden_activation", "tanh")
            .with("visible_activation", "sigmoid")
            .with("cost_function", "binary_crossentropy")
            .with("weights_init", "uniform")
            .with("weights_interval", "montreal")
            .with("weights_mean", 0.0)
            .with("weights_std", 0.005)
            .with("bias_init", 0.0)
    }
    pub fn input_size(&self) -> usize {
        self.input_size
    }
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
    /// Reconstructs concrete values through the compiled prediction
    /// function. The expected input is hidden-shaped if the layer was built
    /// with a [`HiddensHook`], input-shaped otherwise; corruption is never
    /// applied on this path.
    pub fn predict(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut outputs = self.predictor.call(std::slice::from_ref(input))?;
        Ok(outputs.remove(0))
    }
}

impl Model for DenoisingAutoencoder {
    fn inputs(&self) -> Vec<Var> {
        vec![self.input.get().clone()]
    }
    fn hiddens(&self) -> Option<Var> {
        Some(self.hiddens.get().clone())
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
    fn train_cost(&self) -> Option<Var> {
        Some(self.train_cost.clone())
    }
}

#[derive(Default)]
pub struct DenoisingAutoencoderBuilder {
    config: Option<Config>,
    inputs_hook: Option<InputsHook>,
    hiddens_hook: Option<HiddensHook>,
    params_hook: Option<ParamsHook>,
    input_size: Option<usize>,
    hidden_size: Option<usize>,
    corruption_level: Option<f32>,
    noise: Option<String>,
    hidden_activation: Option<String>,
    visible_activation: Option<String>,
    cost_function: Option<String>,
    weights_init: Option<String>,
    weights_interval: Option<UniformInterval>,
    weights_mean: Option<f32>,
    weights_std: Option<f32>,
    bias_init: Option<f32>,
}

impl DenoisingAutoencoderBuilder {
    /// Supplies a configuration; its values override the defaults but not
    /// explicit builder arguments.
    pub fn config(mut self, config: Config) -> Self {
        self.config.replace(config);
        self
    }
    /// Adopts an upstream layer's output as this layer's input.
    pub fn inputs_hook(mut self, hook: impl Into<InputsHook>) -> Self {
        self.inputs_hook.replace(hook.into());
        self
    }
    /// Supplies the hidden representation directly; prediction decodes from
    /// it instead of encoding the input first.
    pub fn hiddens_hook(mut self, hook: impl Into<HiddensHook>) -> Self {
        self.hiddens_hook.replace(hook.into());
        self
    }
    /// Supplies the parameters `[W, b_visible, b_hidden]` instead of
    /// allocating new ones.
    pub fn params_hook(mut self, params: ParamsHook) -> Self {
        self.params_hook.replace(params);
        self
    }
    pub fn input_size(mut self, input_size: usize) -> Self {
        self.input_size.replace(input_size);
        self
    }
    pub fn hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size.replace(hidden_size);
        self
    }
    pub fn corruption_level(mut self, corruption_level: f32) -> Self {
        self.corruption_level.replace(corruption_level);
        self
    }
    pub fn noise(mut self, noise: impl Into<String>) -> Self {
        self.noise.replace(noise.into());
        self
    }
    pub fn hidden_activation(mut self, name: impl Into<String>) -> Self {
        self.hidden_activation.replace(name.into());
        self
    }
    pub fn visible_activation(mut self, name: impl Into<String>) -> Self {
        self.visible_activation.replace(name.into());
        self
    }
    pub fn cost_function(mut self, name: impl Into<String>) -> Self {
        self.cost_function.replace(name.into());
        self
    }
    pub fn weights_init(mut self, name: impl Into<String>) -> Self {
        self.weights_init.replace(name.into());
        self
    }
    pub fn weights_interval(mut self, interval: f32) -> Self {
        self.weights_interval
            .replace(UniformInterval::Explicit(interval));
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
    pub fn bias_init(mut self, value: f32) -> Self {
        self.bias_init.replace(value);
        self
    }

    /// Builds the layer: resolves sizes and functions, allocates or adopts
    /// the input and parameters, and wires both the training and the
    /// prediction graphs.
    pub fn build(self) -> Result<DenoisingAutoencoder> {
        let defaults = DenoisingAutoencoder::defaults();
        let cfg = self.config.as_ref();

        // A hook's shape overrides any configured size.
        let input_size = match &self.inputs_hook {
            Some(hook) => hook.shape.iter().product(),
            None => resolve("input_size", self.input_size, cfg, &defaults)?,
        };
        let hidden_size = match &self.hiddens_hook {
            Some(hook) => hook.size,
            None => resolve("hidden_size", self.hidden_size, cfg, &defaults)?,
        };

        let corruption_level: f32 =
            resolve("corruption_level", self.corruption_level, cfg, &defaults)?;
        let noise: Noise = resolve::<String>("noise", self.noise, cfg, &defaults)?.parse()?;
        let hidden_activation: Activation =
            resolve::<String>("hidden_activation", self.hidden_activation, cfg, &defaults)?
                .parse()?;
        let visible_activation: Activation =
            resolve::<String>("visible_activation", self.visible_activation, cfg, &defaults)?
                .parse()?;
        let cost: Cost =
            resolve::<String>("cost_function", self.cost_function, cfg, &defaults)?.parse()?;

        let input = match self.inputs_hook {
            Some(hook) => Source::Borrowed(hook.tensor),
            None => Source::Owned(Var::placeholder("x", 2)),
        };
        let x = input.get().clone();

        let params = match self.params_hook {
            Some(hook) => Source::Borrowed(expect_params(hook, 3, "DenoisingAutoencoder")?),
            None => {
                let weights_init: WeightInit =
                    resolve::<String>("weights_init", self.weights_init, cfg, &defaults)?
                        .parse()?;
                let shape = [input_size, hidden_size];
                let w = match weights_init {
                    WeightInit::Uniform => {
                        let interval = UniformInterval::resolve(
                            "weights_interval",
                            self.weights_interval,
                            cfg,
                            &defaults,
                        )?;
                        init::uniform_weights(&shape, interval, "W")?
                    }
                    WeightInit::Gaussian => {
                        let mean = resolve("weights_mean", self.weights_mean, cfg, &defaults)?;
                        let std = resolve("weights_std", self.weights_std, cfg, &defaults)?;
                        init::gaussian_weights(&shape, mean, std, "W")?
                    }
                };
                let bias_init: f32 = resolve("bias_init", self.bias_init, cfg, &defaults)?;
                Source::Owned(vec![
                    w,
                    init::bias(input_size, bias_init, "b0"),
                    init::bias(hidden_size, bias_init, "b1"),
                ])
            }
        };
        let w = Var::param(&params.get()[0]);
        let b0 = Var::param(&params.get()[1]);
        let b1 = Var::param(&params.get()[2]);

        // Training path: encode the corrupted input, decode with the tied
        // (transposed) weights, and compare against the clean input. A
        // hiddens hook is irrelevant here: a cost needs input-conditioned
        // hiddens.
        let corrupted = noise.apply(&x, corruption_level);
        let hiddens_train = hidden_activation.apply(&(&corrupted.dot(&w) + &b1));
        let reconstruction_train = visible_activation.apply(&(&hiddens_train.dot(&w.t()) + &b0));
        let train_cost = cost.apply(&reconstruction_train, &x);

        // Prediction path: no corruption; a hiddens hook replaces the
        // encoding entirely.
        let hiddens = match self.hiddens_hook {
            Some(hook) => Source::Borrowed(hook.tensor),
            None => Source::Owned(hidden_activation.apply(&(&x.dot(&w) + &b1))),
        };
        let output = visible_activation.apply(&(&hiddens.get().dot(&w.t()) + &b0));
        let predictor_input = if hiddens.is_borrowed() {
            hiddens.get().clone()
        } else {
            x
        };
        let predictor = Function::new(vec![predictor_input], vec![output.clone()])?;

        debug!(
            input_size,
            hidden_size, corruption_level, "built denoising autoencoder"
        );
        Ok(DenoisingAutoencoder {
            input,
            hiddens,
            output,
            train_cost,
            params,
            predictor,
            input_size,
            hidden_size,
            output_shape: vec![input_size],
        })
    }
}
