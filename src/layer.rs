//! Concrete layers.
//!
//! Each layer is fully built by its builder's `build()`: sizes and options
//! are resolved (explicit argument > supplied config > defaults), hooks are
//! honored, parameters are allocated or adopted, and the computation graph
//! is wired, all before the constructor returns. Layers are immutable
//! afterwards except for their parameter values, which an external training
//! loop updates through the shared [`Param`](crate::graph::Param) handles.

pub mod conv;
pub mod conv_pool;
pub mod dae;

pub use conv::{BorderMode, Conv1d, Conv2d, Conv3d};
pub use conv_pool::ConvPool;
pub use dae::DenoisingAutoencoder;
