use crate::candle_aux_layers::*;
use crate::candle_model_traits::{SetEncoderModuleT, TrialModuleT};
use crate::candle_set_aggregator::{Aggregation, MaskedAggregator};
use crate::candle_trial_encoder::TrialEncoder;
use crate::error::{Result, SetEmbedError};
use crate::trial_set::{IntoTrialSets, TrialBatch, TrialSet};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};

#[derive(Clone, Debug)]
pub struct SetEncoderConfig {
    pub feature_dim: usize,
    pub max_trials: usize,
    pub trial_layers: Vec<usize>,
    pub latent_dim: usize,
    pub aggregation: Aggregation,
    pub post_layers: Vec<usize>,
    /// `None` keeps the pooled vector as is
    pub output_dim: Option<usize>,
}

impl SetEncoderConfig {
    pub fn new(feature_dim: usize, max_trials: usize) -> Self {
        Self {
            feature_dim,
            max_trials,
            trial_layers: vec![40, 40],
            latent_dim: 20,
            aggregation: Aggregation::Sum,
            post_layers: vec![],
            output_dim: None,
        }
    }

    pub fn with_trial_net(mut self, layers: &[usize], latent_dim: usize) -> Self {
        self.trial_layers = layers.to_vec();
        self.latent_dim = latent_dim;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_post_net(mut self, layers: &[usize], output_dim: usize) -> Self {
        self.post_layers = layers.to_vec();
        self.output_dim = Some(output_dim);
        self
    }

    pub fn embedding_dim(&self) -> usize {
        self.output_dim.unwrap_or(self.latent_dim)
    }
}

///
/// Trial net → masked pooling → post net
///
/// The trial net sees one flattened `(batch * max_trials) x feature_dim`
/// tensor, so every slot goes through the very same parameters; the
/// only place slots meet is the commutative reduction.
///
pub struct PermutationInvariantEncoder<T = TrialEncoder>
where
    T: TrialModuleT,
{
    config: SetEncoderConfig,
    trial: T,
    aggregator: MaskedAggregator,
    post: StackLayers<Linear>,
    device: Device,
    dtype: DType,
}

impl PermutationInvariantEncoder<TrialEncoder> {
    /// Will create a set encoder with these variables:
    ///
    /// * `nn.trial.fc.{}.weight`, `nn.trial.out.weight` (per-trial net)
    /// * `nn.post.fc.{}.weight`, `nn.post.out.weight` (if `output_dim`)
    ///
    /// # Arguments
    /// * `config` - dims, layers and reduction
    /// * `vs` - variable builder; its var map owns every parameter
    pub fn new(config: SetEncoderConfig, vs: VarBuilder) -> Result<Self> {
        let trial = TrialEncoder::new(
            config.feature_dim,
            config.latent_dim,
            &config.trial_layers,
            vs.clone(),
        )?;
        Self::with_trial_module(trial, config, vs)
    }
}

impl<T> PermutationInvariantEncoder<T>
where
    T: TrialModuleT,
{
    /// Wrap any per-trial module that agrees with `config` on its dims
    pub fn with_trial_module(trial: T, config: SetEncoderConfig, vs: VarBuilder) -> Result<Self> {
        if trial.dim_obs() != config.feature_dim {
            return Err(SetEmbedError::shape(
                "trial module input dim",
                config.feature_dim,
                trial.dim_obs(),
            ));
        }
        if trial.dim_latent() != config.latent_dim {
            return Err(SetEmbedError::shape(
                "trial module latent dim",
                config.latent_dim,
                trial.dim_latent(),
            ));
        }
        if config.max_trials == 0 {
            return Err(SetEmbedError::invalid("max_trials must be positive"));
        }

        let post = match config.output_dim {
            Some(out_dim) => fc_stack(
                config.latent_dim,
                &config.post_layers,
                out_dim,
                vs.pp("nn.post"),
            )?,
            None if config.post_layers.is_empty() => StackLayers::new(),
            None => {
                return Err(SetEmbedError::invalid(
                    "post-network layers given without an output dim",
                ))
            }
        };

        Ok(Self {
            aggregator: MaskedAggregator::new(config.aggregation),
            device: vs.device().clone(),
            dtype: vs.dtype(),
            config,
            trial,
            post,
        })
    }

    pub fn config(&self) -> &SetEncoderConfig {
        &self.config
    }

    pub fn trial_module(&self) -> &T {
        &self.trial
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Reject a batch before any network is evaluated
    pub fn validate(&self, batch: &TrialBatch) -> Result<()> {
        if batch.feature_dim() != self.config.feature_dim {
            return Err(SetEmbedError::shape(
                "trial feature dim",
                self.config.feature_dim,
                batch.feature_dim(),
            ));
        }
        if batch.max_trials() > self.config.max_trials {
            return Err(SetEmbedError::shape(
                "trial-set length",
                self.config.max_trials,
                batch.max_trials(),
            ));
        }
        if self.config.aggregation == Aggregation::Mean {
            if let Some(b) = batch.counts().iter().position(|&c| c == 0) {
                return Err(SetEmbedError::invalid(format!(
                    "mean over zero present trials (set {} of {})",
                    b,
                    batch.batch_size()
                )));
            }
        }
        Ok(())
    }

    /// Pooled latent before the post network (b x latent_dim)
    pub fn pooled(&self, batch: &TrialBatch) -> Result<Tensor> {
        self.validate(batch)?;

        let (bb, mm, dd) = batch.values().dims3()?;
        let x_nd = batch
            .values()
            .to_device(&self.device)?
            .to_dtype(self.dtype)?
            .reshape((bb * mm, dd))?;

        let h_nk = self.trial.forward(&x_nd)?;
        let kk = h_nk.dim(1)?;
        let h_bmk = h_nk.reshape((bb, mm, kk))?;

        let mask_bm = batch.mask().to_device(&self.device)?;
        self.aggregator.aggregate(&h_bmk, &mask_bm)
    }

    /// Per-element encoding of a single trial (1 x latent_dim)
    pub fn encode_trial(&self, trial: &[f32]) -> Result<Tensor> {
        if trial.len() != self.config.feature_dim {
            return Err(SetEmbedError::shape(
                "trial feature dim",
                self.config.feature_dim,
                trial.len(),
            ));
        }
        let x_1d = Tensor::from_slice(trial, (1, trial.len()), &self.device)?.to_dtype(self.dtype)?;
        Ok(self.trial.forward(&x_1d)?)
    }

    /// Embed a single set (1 x embedding_dim)
    pub fn encode_set(&self, set: &TrialSet) -> Result<Tensor> {
        self.encode(&TrialBatch::from_set(set, &self.device)?)
    }

    /// Embed several sets padded to the configured `max_trials`
    pub fn encode_sets(&self, sets: &[TrialSet]) -> Result<Tensor> {
        let batch = TrialBatch::from_sets(sets, Some(self.config.max_trials), &self.device);
        self.encode(&batch.map_err(|e| self.explain_batch_error(sets, e))?)
    }

    /// Embed NaN-padded dense input (`ndarray` or `Tensor`, rank 2 or 3)
    pub fn encode_dense<X>(&self, x: &X) -> Result<Tensor>
    where
        X: IntoTrialSets + ?Sized,
    {
        self.encode_sets(&x.to_trial_sets()?)
    }

    // feature-dim disagreements are reported against the configured
    // dim, not against whichever set came first in the batch
    fn explain_batch_error(&self, sets: &[TrialSet], err: SetEmbedError) -> SetEmbedError {
        match sets
            .iter()
            .find(|s| s.feature_dim() != self.config.feature_dim)
        {
            Some(bad) => SetEmbedError::shape(
                "trial feature dim",
                self.config.feature_dim,
                bad.feature_dim(),
            ),
            None => err,
        }
    }
}

impl<T> SetEncoderModuleT for PermutationInvariantEncoder<T>
where
    T: TrialModuleT,
{
    fn encode(&self, batch: &TrialBatch) -> Result<Tensor> {
        let pooled_bk = self.pooled(batch)?;
        Ok(self.post.forward(&pooled_bk)?)
    }

    fn dim_obs(&self) -> usize {
        self.config.feature_dim
    }

    fn dim_output(&self) -> usize {
        self.config.embedding_dim()
    }
}

/// NaN-padded tensor in, embedding out; for plugging the encoder into
/// code that only speaks `candle_nn::Module`
impl<T> Module for PermutationInvariantEncoder<T>
where
    T: TrialModuleT,
{
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        Ok(self.encode_dense(xs)?)
    }
}
