use crate::candle_data_loader::*;
use crate::candle_gaussian_head::GaussianPosteriorHead;
use crate::candle_inference::TrainConfig;
use crate::candle_model_traits::{ConditionalDensityT, SetEncoderModuleT};
use crate::trial_set::{TrialBatch, TrialSet};

use candle_nn::AdamW;
use candle_nn::Optimizer;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

/// Neural posterior estimation: a set encoder feeding a conditional
/// density over the parameters, trained jointly
pub struct Npe<'a, Enc, Head>
where
    Enc: SetEncoderModuleT,
    Head: ConditionalDensityT,
{
    pub encoder: &'a Enc,
    pub head: &'a Head,
    pub variable_map: &'a candle_nn::VarMap,
}

pub trait NpeT<'a, Enc, Head>
where
    Enc: SetEncoderModuleT,
    Head: ConditionalDensityT,
    Self: Sized,
{
    /// Maximize E log q(θ | encoder(x)) over simulated pairs
    /// * `data` - data loader should have `minibatch_data`
    /// * `train_config` - training configuration
    ///
    /// Returns the per-epoch average log-likelihood
    fn train<DataL>(&mut self, data: &mut DataL, train_config: &TrainConfig) -> anyhow::Result<Vec<f32>>
    where
        DataL: DataLoader;

    /// Build an NPE model
    /// * `encoder` - set encoder module
    /// * `head` - conditional density on the encoder's output
    /// * `variable_map` - holds the parameters of both
    fn build(encoder: &'a Enc, head: &'a Head, variable_map: &'a candle_nn::VarMap) -> anyhow::Result<Self>;
}

impl<'a, Enc, Head> NpeT<'a, Enc, Head> for Npe<'a, Enc, Head>
where
    Enc: SetEncoderModuleT,
    Head: ConditionalDensityT,
{
    fn train<DataL>(&mut self, data: &mut DataL, train_config: &TrainConfig) -> anyhow::Result<Vec<f32>>
    where
        DataL: DataLoader,
    {
        if data.dim_param() != self.head.dim_param() {
            return Err(anyhow::anyhow!(
                "data parameter dim {} vs. density parameter dim {}",
                data.dim_param(),
                self.head.dim_param()
            ));
        }

        let device = &train_config.device;
        let mut adam = AdamW::new_lr(
            self.variable_map.all_vars(),
            train_config.learning_rate.into(),
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut llik_trace = vec![];

        for epoch in 0..train_config.num_epochs {
            data.shuffle_minibatch(train_config.batch_size)?;

            let mut llik_tot = 0f32;

            for b in 0..data.num_minibatch() {
                let mb = data.minibatch_data(b, device)?;
                let context_nc = self.encoder.encode(&mb.trials)?;
                let llik = self.head.log_prob(&mb.theta, &context_nc)?.mean_all()?;
                let loss = llik.neg()?;
                adam.backward_step(&loss)?;
                llik_tot += llik.to_scalar::<f32>()?;
            }
            llik_trace.push(llik_tot / data.num_minibatch().max(1) as f32);
            pb.inc(1);

            if train_config.verbose {
                info!(
                    "[{}] log-likelihood: {}",
                    epoch + 1,
                    llik_trace.last().ok_or(anyhow::anyhow!("llik"))?
                );
            }
        } // each epoch

        pb.finish_and_clear();
        Ok(llik_trace)
    }

    fn build(encoder: &'a Enc, head: &'a Head, variable_map: &'a candle_nn::VarMap) -> anyhow::Result<Self> {
        if encoder.dim_output() != head.dim_context() {
            return Err(anyhow::anyhow!(
                "encoder output dim {} vs. density context dim {}",
                encoder.dim_output(),
                head.dim_context()
            ));
        }

        Ok(Self {
            encoder,
            head,
            variable_map,
        })
    }
}

impl<Enc> Npe<'_, Enc, GaussianPosteriorHead>
where
    Enc: SetEncoderModuleT,
{
    /// Posterior mean and variance per parameter dim for one observed set
    pub fn posterior_summary(
        &self,
        trials: &TrialSet,
        device: &candle_core::Device,
    ) -> anyhow::Result<(Vec<f32>, Vec<f32>)> {
        let batch = TrialBatch::from_set(trials, device)?;
        let context_1c = self.encoder.encode(&batch)?;
        let (mean_1p, lnvar_1p) = self.head.mean_and_lnvar(&context_1c)?;
        let mean = mean_1p.flatten_all()?.to_vec1::<f32>()?;
        let var = lnvar_1p.exp()?.flatten_all()?.to_vec1::<f32>()?;
        Ok((mean, var))
    }
}
