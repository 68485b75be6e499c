//! Composable neural-network layers over a symbolic computation graph.
//!
//! Each layer declares its parameters symbolically and wires itself into a
//! deferred computation graph inside its builder's `build()`. Deep networks
//! are composed at construction time through *hooks*:
//!
//! - an [`InputsHook`](model::InputsHook) makes an upstream layer's output
//!   node the new layer's input, so chaining constructors chains the graph;
//! - a [`HiddensHook`](model::HiddensHook) hands a generative layer its
//!   hidden representation directly, bypassing the encode step for
//!   prediction;
//! - a [`ParamsHook`](model::ParamsHook) shares existing parameters instead
//!   of allocating new ones.
//!
//! Every layer exposes the same accessor contract ([`Model`](model::Model)):
//! inputs, hiddens, outputs, output shape, parameters, and training cost.
//! An optimizer drives training through `params()` and `train_cost()`
//! alone; it never touches hooks or layer internals.
//!
//! Graph construction is single-threaded and synchronous; the only
//! non-trivial costs are the one-time compilation of a prediction
//! [`Function`](graph::Function) and its invocations. Parameter values are
//! shared mutable state behind the [`Param`](graph::Param) handles; the
//! training loop is the single writer.
//!
//! ```
//! use layergraph::layer::DenoisingAutoencoder;
//! use layergraph::model::Model;
//! use ndarray::ArrayD;
//!
//! # fn main() -> layergraph::Result<()> {
//! let first = DenoisingAutoencoder::builder()
//!     .input_size(8)
//!     .hidden_size(4)
//!     .corruption_level(0.2)
//!     .build()?;
//! // The second layer's input IS the first layer's output node.
//! let second = DenoisingAutoencoder::builder()
//!     .inputs_hook(&first)
//!     .hidden_size(2)
//!     .build()?;
//! assert!(second.inputs()[0].ptr_eq(&first.outputs()));
//!
//! let batch = ArrayD::zeros(ndarray::IxDyn(&[2, 8]));
//! let reconstruction = first.predict(&batch)?;
//! assert_eq!(reconstruction.shape(), &[2, 8]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod functional;
pub mod graph;
pub mod init;
pub mod layer;
pub mod model;

pub use config::Config;
pub use error::{Error, Result};
pub use model::Model;
