use crate::candle_aux_layers::*;
use crate::candle_loss_functions::gaussian_log_density;
use crate::candle_model_traits::ConditionalDensityT;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Diagonal Gaussian q(θ | context) with an MLP on the context
///
/// Just enough of a conditional density to train a set encoder
/// end to end.
pub struct GaussianPosteriorHead {
    n_param: usize,
    n_context: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl ConditionalDensityT for GaussianPosteriorHead {
    fn log_prob(&self, theta_np: &Tensor, context_nc: &Tensor) -> Result<Tensor> {
        let (mean_np, lnvar_np) = self.mean_and_lnvar(context_nc)?;
        gaussian_log_density(theta_np, &mean_np, &lnvar_np)
    }

    fn dim_param(&self) -> usize {
        self.n_param
    }

    fn dim_context(&self) -> usize {
        self.n_context
    }
}

impl GaussianPosteriorHead {
    /// Will create a Gaussian head with these variables:
    ///
    /// * `nn.head.fc.{}.weight` where {} is the layer index
    /// * `nn.head.mean.weight`
    /// * `nn.head.lnvar.weight`
    ///
    /// # Arguments
    /// * `n_param` - parameter dim
    /// * `n_context` - embedding dim
    /// * `layers` - hidden widths
    /// * `vs` - variable builder
    pub fn new(n_param: usize, n_context: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        let vs = vs.pp("nn.head");
        let (fc, prev_dim) = hidden_stack(n_context, layers, vs.clone())?;
        let z_mean = candle_nn::linear(prev_dim, n_param, vs.pp("mean"))?;
        let z_lnvar = candle_nn::linear(prev_dim, n_param, vs.pp("lnvar"))?;
        Ok(Self {
            n_param,
            n_context,
            fc,
            z_mean,
            z_lnvar,
        })
    }

    ///
    /// Evaluate Gaussian parameters: mu and log_var
    /// θ ~ N(mu(e), exp(log_var(e)))
    pub fn mean_and_lnvar(&self, context_nc: &Tensor) -> Result<(Tensor, Tensor)> {
        let min_lv = -10.;
        let max_lv = 8.;

        let h_nl = self.fc.forward(context_nc)?;
        let mean_np = self.z_mean.forward(&h_nl)?;
        let lnvar_np = self.z_lnvar.forward(&h_nl)?.clamp(min_lv, max_lv)?;
        Ok((mean_np, lnvar_np))
    }

    /// Draw `n_samples` parameters for a single context
    ///
    /// * `context_1c` - one embedding (1 x c)
    pub fn sample(&self, context_1c: &Tensor, n_samples: usize) -> Result<Tensor> {
        let (mean_1p, lnvar_1p) = self.mean_and_lnvar(context_1c)?;
        let eps_sp = Tensor::zeros((n_samples, self.n_param), mean_1p.dtype(), mean_1p.device())?
            .randn_like(0., 1.)?;
        let sd_1p = (lnvar_1p * 0.5)?.exp()?;
        eps_sp.broadcast_mul(&sd_1p)?.broadcast_add(&mean_1p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn shapes() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let vs = VarBuilder::from_varmap(&vm, DType::F32, &dev);
        let head = GaussianPosteriorHead::new(2, 5, &[16], vs)?;

        let ctx = Tensor::randn(0_f32, 1_f32, (4, 5), &dev)?;
        let theta = Tensor::randn(0_f32, 1_f32, (4, 2), &dev)?;
        assert_eq!(head.log_prob(&theta, &ctx)?.dims(), &[4]);

        let draws = head.sample(&ctx.narrow(0, 0, 1)?, 7)?;
        assert_eq!(draws.dims(), &[7, 2]);
        Ok(())
    }
}
