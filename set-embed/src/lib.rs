pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_gaussian_head;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_npe_inference;
pub mod candle_set_aggregator;
pub mod candle_set_encoder;
pub mod candle_trial_encoder;
pub mod cli;
pub mod error;
pub mod simulate;
pub mod trial_set;

pub use candle_core;
pub use candle_nn;

pub use candle_set_aggregator::Aggregation;
pub use candle_set_encoder::{PermutationInvariantEncoder, SetEncoderConfig};
pub use error::SetEmbedError;
pub use trial_set::{IntoTrialSets, TrialBatch, TrialSet};
