use crate::error::Result as EmbedResult;
use crate::trial_set::TrialBatch;
use candle_core::{Result, Tensor};

pub trait TrialModuleT {
    /// A per-element encoder applied with shared parameters to every
    /// trial; no information may flow between rows
    ///
    /// # Arguments
    /// * `x_nd` - trial features (n x d)
    ///
    /// # Returns `h_nk` - per-trial latent (n x k)
    fn forward(&self, x_nd: &Tensor) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait SetEncoderModuleT {
    /// Embed a batch of trial sets into fixed-size vectors
    ///
    /// # Arguments
    /// * `batch` - padded trial sets with their presence mask
    ///
    /// # Returns `e_nc` - one embedding per set (n x c)
    fn encode(&self, batch: &TrialBatch) -> EmbedResult<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_output(&self) -> usize;
}

pub trait ConditionalDensityT {
    /// log q(θ | context)
    ///
    /// # Arguments
    /// * `theta_np` - parameters (n x p)
    /// * `context_nc` - conditioning embedding (n x c)
    ///
    /// # Returns log density per row (n)
    fn log_prob(&self, theta_np: &Tensor, context_nc: &Tensor) -> Result<Tensor>;

    fn dim_param(&self) -> usize;

    fn dim_context(&self) -> usize;
}
