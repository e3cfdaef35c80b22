//! # faultline core
//!
//! Pure pipeline logic for faultline: data models, artifact schemas,
//! chunking, response recovery, the store and model seams, both analysis
//! phases and the metrics aggregator.
//!
//! This crate does no filesystem or network I/O of its own. The file store,
//! the Ollama client and the external artifact builders live in the
//! `faultline` app crate and plug in through [`store::Store`],
//! [`model::ModelClient`] and [`artifact::ArtifactBuilder`].

pub mod artifact;
pub mod chunk;
pub mod context;
pub mod detect;
pub mod error;
pub mod extract;
pub mod index;
pub mod metrics;
pub mod model;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod store;

pub use error::{PipelineError, Result};
