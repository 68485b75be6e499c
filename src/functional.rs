use crate::graph::Var;
use crate::Error;
use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Elementwise activation function, selected by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Sigmoid,
    Tanh,
    Rectifier,
    Softplus,
}

impl Activation {
    pub const NAMES: &'static [&'static str] =
        &["linear", "sigmoid", "tanh", "rectifier", "softplus"];
    pub fn name(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Rectifier => "rectifier",
            Self::Softplus => "softplus",
        }
    }
    /// Applies the activation to a graph node. `Linear` is the identity and
    /// adds no node.
    pub fn apply(self, input: &Var) -> Var {
        match self {
            Self::Linear => input.clone(),
            _ => input.activate(self),
        }
    }
    pub(crate) fn eval(self, x: f32) -> f32 {
        match self {
            Self::Linear => x,
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Rectifier => x.max(0.0),
            Self::Softplus => x.exp().ln_1p(),
        }
    }
    /// Derivative at `x`, given the already computed output `y`.
    pub(crate) fn grad(self, x: f32, y: f32) -> f32 {
        match self {
            Self::Linear => 1.0,
            Self::Sigmoid => y * (1.0 - y),
            Self::Tanh => 1.0 - y * y,
            Self::Rectifier => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Softplus => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;
    fn from_str(name: &str) -> Result<Self, Error> {
        match name.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "rectifier" | "relu" => Ok(Self::Rectifier),
            "softplus" => Ok(Self::Softplus),
            _ => Err(Error::UnsupportedActivation {
                name: name.into(),
                known: Self::NAMES,
            }),
        }
    }
}

impl Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reconstruction / training cost function, selected by name.
///
/// Applying a cost builds a scalar graph node: the mean of the per-element
/// cost between an output and a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cost {
    BinaryCrossentropy,
    MeanSquaredError,
}

// Keeps sigmoid outputs away from log(0).
const COST_EPSILON: f32 = 1e-7;

impl Cost {
    pub const NAMES: &'static [&'static str] = &["binary_crossentropy", "mse"];
    pub fn name(self) -> &'static str {
        match self {
            Self::BinaryCrossentropy => "binary_crossentropy",
            Self::MeanSquaredError => "mse",
        }
    }
    /// Builds the scalar cost node comparing `output` against `target`.
    pub fn apply(self, output: &Var, target: &Var) -> Var {
        Var::cost(self, output, target)
    }
    pub(crate) fn eval(self, output: &ArrayD<f32>, target: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        anyhow::ensure!(
            output.shape() == target.shape(),
            "{} expects matching shapes, got {:?} and {:?}",
            self.name(),
            output.shape(),
            target.shape()
        );
        let mean = match self {
            Self::BinaryCrossentropy => {
                let mut total = 0.0f32;
                for (&y, &t) in output.iter().zip(target.iter()) {
                    let y = y.clamp(COST_EPSILON, 1.0 - COST_EPSILON);
                    total -= t * y.ln() + (1.0 - t) * (1.0 - y).ln();
                }
                total / output.len() as f32
            }
            Self::MeanSquaredError => {
                let total: f32 = output
                    .iter()
                    .zip(target.iter())
                    .map(|(&y, &t)| (y - t) * (y - t))
                    .sum();
                total / output.len() as f32
            }
        };
        Ok(ndarray::arr0(mean).into_dyn())
    }
    /// Gradient of the mean cost with respect to the output.
    pub(crate) fn grad_output(self, output: &ArrayD<f32>, target: &ArrayD<f32>) -> ArrayD<f32> {
        let scale = 1.0 / output.len() as f32;
        let mut grad = ArrayD::zeros(output.raw_dim());
        for ((&y, &t), g) in output.iter().zip(target.iter()).zip(grad.iter_mut()) {
            *g = match self {
                Self::BinaryCrossentropy => {
                    let y = y.clamp(COST_EPSILON, 1.0 - COST_EPSILON);
                    scale * (y - t) / (y * (1.0 - y))
                }
                Self::MeanSquaredError => scale * 2.0 * (y - t),
            };
        }
        grad
    }
}

impl FromStr for Cost {
    type Err = Error;
    fn from_str(name: &str) -> Result<Self, Error> {
        match name.to_lowercase().as_str() {
            "binary_crossentropy" => Ok(Self::BinaryCrossentropy),
            "mse" | "mean_squared_error" => Ok(Self::MeanSquaredError),
            _ => Err(Error::UnsupportedCost {
                name: name.into(),
                known: Self::NAMES,
            }),
        }
    }
}

impl Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stochastic input corruption, selected by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Noise {
    /// Each element is independently kept with probability `1 - level`,
    /// otherwise driven to 0 or 1 with equal probability.
    SaltAndPepper,
    /// Additive gaussian noise with standard deviation `level`.
    Gaussian,
}

impl Noise {
    pub const NAMES: &'static [&'static str] = &["salt_and_pepper", "gaussian"];
    pub fn name(self) -> &'static str {
        match self {
            Self::SaltAndPepper => "salt_and_pepper",
            Self::Gaussian => "gaussian",
        }
    }
    /// Builds a corruption node over `input`.
    pub fn apply(self, input: &Var, level: f32) -> Var {
        input.corrupt(self, level)
    }
    /// Samples a corruption of `x`. Returns the corrupted values and the
    /// elementwise derivative of the corruption, so a backward pass can see
    /// the same realization.
    pub(crate) fn corrupt(self, x: &ArrayD<f32>, level: f32) -> (ArrayD<f32>, ArrayD<f32>) {
        let mut rng = rand::thread_rng();
        let mut out = x.clone();
        let mut mask = ArrayD::ones(x.raw_dim());
        match self {
            Self::SaltAndPepper => {
                for (v, m) in out.iter_mut().zip(mask.iter_mut()) {
                    if rng.gen::<f32>() < level {
                        *v = if rng.gen_bool(0.5) { 1.0 } else { 0.0 };
                        *m = 0.0;
                    }
                }
            }
            Self::Gaussian => {
                if level > 0.0 {
                    let normal = Normal::new(0.0f32, level).expect("std is positive");
                    for v in out.iter_mut() {
                        *v += normal.sample(&mut rng);
                    }
                }
            }
        }
        (out, mask)
    }
}

impl FromStr for Noise {
    type Err = Error;
    fn from_str(name: &str) -> Result<Self, Error> {
        match name.to_lowercase().as_str() {
            "salt_and_pepper" => Ok(Self::SaltAndPepper),
            "gaussian" => Ok(Self::Gaussian),
            _ => Err(Error::UnsupportedNoise {
                name: name.into(),
                known: Self::NAMES,
            }),
        }
    }
}

impl Display for Noise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Function;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn activation_lookup() {
        assert_eq!("tanh".parse::<Activation>().unwrap(), Activation::Tanh);
        assert_eq!(
            "Rectifier".parse::<Activation>().unwrap(),
            Activation::Rectifier
        );
        let err = "relufoo".parse::<Activation>().unwrap_err();
        match err {
            Error::UnsupportedActivation { ref name, .. } => assert_eq!(name, "relufoo"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("relufoo"));
    }

    #[test]
    fn cost_and_noise_lookup() {
        assert_eq!(
            "binary_crossentropy".parse::<Cost>().unwrap(),
            Cost::BinaryCrossentropy
        );
        assert!(matches!(
            "l7".parse::<Cost>().unwrap_err(),
            Error::UnsupportedCost { .. }
        ));
        assert_eq!(
            "salt_and_pepper".parse::<Noise>().unwrap(),
            Noise::SaltAndPepper
        );
        assert!(matches!(
            "speckle".parse::<Noise>().unwrap_err(),
            Error::UnsupportedNoise { .. }
        ));
    }

    #[test]
    fn sigmoid_values() {
        assert_relative_eq!(Activation::Sigmoid.eval(0.0), 0.5);
        assert_relative_eq!(Activation::Tanh.eval(0.0), 0.0);
        assert_relative_eq!(Activation::Rectifier.eval(-2.0), 0.0);
        assert_relative_eq!(Activation::Rectifier.eval(2.0), 2.0);
    }

    #[test]
    fn salt_and_pepper_extremes() {
        let x = arr2(&[[0.3f32, 0.7, 0.5], [0.2, 0.9, 0.4]]).into_dyn();
        let (clean, mask) = Noise::SaltAndPepper.corrupt(&x, 0.0);
        assert_eq!(clean, x);
        assert!(mask.iter().all(|&m| m == 1.0));
        let (corrupted, mask) = Noise::SaltAndPepper.corrupt(&x, 1.0);
        assert!(corrupted.iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(mask.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn corruption_node_is_identity_at_level_zero() {
        let x = Var::placeholder("x", 2);
        let corrupted = Noise::SaltAndPepper.apply(&x, 0.0);
        let f = Function::new(vec![x], vec![corrupted]).unwrap();
        let input = arr2(&[[0.1f32, 0.2], [0.3, 0.4]]).into_dyn();
        let out = f.call(&[input.clone()]).unwrap();
        assert_eq!(out[0], input);
    }

    #[test]
    fn binary_crossentropy_matches_hand_computed() {
        let y = arr2(&[[0.8f32, 0.2]]).into_dyn();
        let t = arr2(&[[1.0f32, 0.0]]).into_dyn();
        let cost = Cost::BinaryCrossentropy.eval(&y, &t).unwrap();
        let expected = -((0.8f32).ln() + (0.8f32).ln()) / 2.0;
        assert_relative_eq!(cost.sum(), expected, max_relative = 1e-5);
    }
}
