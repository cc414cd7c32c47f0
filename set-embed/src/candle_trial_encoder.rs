use crate::candle_aux_layers::*;
use crate::candle_model_traits::TrialModuleT;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Feed-forward network shared by every trial in a set
pub struct TrialEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
}

impl TrialModuleT for TrialEncoder {
    fn forward(&self, x_nd: &Tensor) -> Result<Tensor> {
        self.fc.forward(x_nd)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl Module for TrialEncoder {
    fn forward(&self, x_nd: &Tensor) -> Result<Tensor> {
        self.fc.forward(x_nd)
    }
}

impl TrialEncoder {
    /// Will create a per-trial encoder with these variables:
    ///
    /// * `nn.trial.fc.{}.weight` where {} is the hidden layer index
    /// * `nn.trial.out.weight`
    ///
    /// # Arguments
    /// * `n_features` - trial feature dim
    /// * `n_latent` - per-trial latent dim
    /// * `layers` - hidden widths (ReLU after each)
    /// * `vs` - variable builder
    pub fn new(n_features: usize, n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        let fc = fc_stack(n_features, layers, n_latent, vs.pp("nn.trial"))?;
        Ok(Self {
            n_features,
            n_latent,
            fc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn rows_are_encoded_independently() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let vs = VarBuilder::from_varmap(&vm, DType::F32, &dev);
        let enc = TrialEncoder::new(2, 4, &[8, 8], vs)?;

        let x = Tensor::from_vec(vec![0.5_f32, -1., 2., 3., -0.1, 0.], (3, 2), &dev)?;
        let h = TrialModuleT::forward(&enc, &x)?;
        assert_eq!(h.dims(), &[3, 4]);

        // the embedding of row 1 does not depend on its neighbours
        let h1 = TrialModuleT::forward(&enc, &x.narrow(0, 1, 1)?)?;
        let diff = (h.narrow(0, 1, 1)? - h1)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);

        // three linear maps, weight + bias each
        assert_eq!(vm.all_vars().len(), 6);
        Ok(())
    }
}
