use thiserror::Error;

/// Result type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while constructing layers.
///
/// Everything here is a configuration or programming error surfaced eagerly
/// at construction time, before any graph is built. None of these are
/// retried.
#[derive(Debug, Error)]
pub enum Error {
    /// A required option resolved to nothing.
    #[error("option {option:?} was not given a value (explicit argument, config, or default)!")]
    MissingOption { option: String },
    /// An option resolved to a value of the wrong shape or type.
    #[error("option {option:?} has an invalid value: {reason}")]
    InvalidOption { option: String, reason: String },
    /// A params hook had the wrong number of entries.
    #[error("expected {expected} params in the hook for {layer}, found {found}!")]
    InvalidParameterCount {
        layer: &'static str,
        expected: usize,
        found: usize,
    },
    /// Unrecognized weight initialization scheme.
    #[error("did not recognize weights_init {name:?}, expected one of {known:?}")]
    UnsupportedInit {
        name: String,
        known: &'static [&'static str],
    },
    /// Unrecognized activation function name.
    #[error("did not recognize activation {name:?}, expected one of {known:?}")]
    UnsupportedActivation {
        name: String,
        known: &'static [&'static str],
    },
    /// Unrecognized cost function name.
    #[error("did not recognize cost function {name:?}, expected one of {known:?}")]
    UnsupportedCost {
        name: String,
        known: &'static [&'static str],
    },
    /// Unrecognized noise function name.
    #[error("did not recognize noise {name:?}, expected one of {known:?}")]
    UnsupportedNoise {
        name: String,
        known: &'static [&'static str],
    },
    /// Unrecognized convolution border mode.
    #[error("invalid border mode {name:?}, expected one of \"valid\", \"full\", \"same\"")]
    InvalidBorderMode { name: String },
    /// Channel group count outside the supported set.
    #[error("group must be 1 or 2, got {group}")]
    InvalidGroup { group: usize },
    /// A layer that is intentionally not implemented.
    #[error("{0} is not implemented yet")]
    Unimplemented(&'static str),
    /// A runtime error from the graph engine (shape mismatch, unbound
    /// placeholder, missing gradient).
    #[error(transparent)]
    Graph(#[from] anyhow::Error),
}
