use crate::config::{resolve, Config};
use crate::graph::Param;
use crate::{Error, Result};
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde_json::Value;
use std::str::FromStr;

/// Weight initialization scheme, selected by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightInit {
    Uniform,
    Gaussian,
}

impl WeightInit {
    pub const NAMES: &'static [&'static str] = &["uniform", "gaussian"];
}

impl FromStr for WeightInit {
    type Err = Error;
    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "gaussian" => Ok(Self::Gaussian),
            _ => Err(Error::UnsupportedInit {
                name: name.into(),
                known: Self::NAMES,
            }),
        }
    }
}

/// Interval for uniform weight initialization: an explicit bound, or the
/// "montreal" heuristic `sqrt(6 / (fan_in + fan_out))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformInterval {
    Montreal,
    Explicit(f32),
}

impl UniformInterval {
    /// Resolves the `weights_interval` option, which may be the string
    /// `"montreal"` or a number.
    pub fn resolve(
        option: &str,
        explicit: Option<UniformInterval>,
        config: Option<&Config>,
        defaults: &Config,
    ) -> Result<Self> {
        if let Some(interval) = explicit {
            return Ok(interval);
        }
        let value: Value = resolve(option, None, config, defaults)?;
        match value {
            Value::String(s) if s == "montreal" => Ok(Self::Montreal),
            Value::Number(n) => n
                .as_f64()
                .map(|x| Self::Explicit(x as f32))
                .ok_or_else(|| Error::InvalidOption {
                    option: option.into(),
                    reason: format!("{n} is not a finite number"),
                }),
            other => Err(Error::InvalidOption {
                option: option.into(),
                reason: format!("expected \"montreal\" or a number, found {other}"),
            }),
        }
    }
    fn bound(self, shape: &[usize]) -> f32 {
        match self {
            Self::Explicit(interval) => interval,
            Self::Montreal => {
                let fan_out = shape[0];
                let fan_in: usize = shape[1..].iter().product();
                (6.0 / (fan_in + fan_out) as f32).sqrt()
            }
        }
    }
}

/// Allocates a weight parameter drawn from `(-interval, interval)`.
pub fn uniform_weights(shape: &[usize], interval: UniformInterval, name: &str) -> Result<Param> {
    let bound = interval.bound(shape);
    if !bound.is_finite() || bound < 0.0 {
        return Err(Error::InvalidOption {
            option: "weights_interval".into(),
            reason: format!("interval must be finite and non-negative, got {bound}"),
        });
    }
    let distr = Uniform::new_inclusive(-bound, bound);
    Ok(sampled(shape, name, distr))
}

/// Allocates a weight parameter drawn from `N(mean, std)`.
pub fn gaussian_weights(shape: &[usize], mean: f32, std: f32, name: &str) -> Result<Param> {
    if !std.is_finite() || std < 0.0 {
        return Err(Error::InvalidOption {
            option: "weights_std".into(),
            reason: format!("standard deviation must be finite and non-negative, got {std}"),
        });
    }
    if std == 0.0 {
        return Ok(Param::new(name, ArrayD::from_elem(IxDyn(shape), mean)));
    }
    let distr = Normal::new(mean, std).expect("std is positive and finite");
    Ok(sampled(shape, name, distr))
}

/// Allocates a constant-initialized bias parameter of length `len`.
pub fn bias(len: usize, value: f32, name: &str) -> Param {
    Param::new(name, ArrayD::from_elem(IxDyn(&[len]), value))
}

fn sampled(shape: &[usize], name: &str, distr: impl Distribution<f32>) -> Param {
    let mut rng = rand::thread_rng();
    let data: Vec<f32> = (&mut rng)
        .sample_iter(distr)
        .take(shape.iter().product())
        .collect();
    let array = ArrayD::from_shape_vec(IxDyn(shape), data).expect("sampled exactly size elements");
    Param::new(name, array)
}
