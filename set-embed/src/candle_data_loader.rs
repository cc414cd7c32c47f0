use crate::simulate::SimulatedData;
use crate::trial_set::{TrialBatch, TrialSet};

use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rayon::prelude::*;

pub struct SetMinibatch {
    pub theta: Tensor,
    pub trials: TrialBatch,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<SetMinibatch>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;

    /// dim of each θ row
    fn dim_param(&self) -> usize;
}

///
/// In-memory (θ, trial set) pairs. Every set is padded to the same
/// `max_trials` so minibatches stack without reshaping.
///
pub struct SimulationData {
    thetas: Vec<Vec<f32>>,
    trials: Vec<TrialSet>,
    max_trials: usize,
    shuffled: Option<Vec<SetMinibatch>>,
    minibatches: Minibatches,
}

impl SimulationData {
    pub fn new(data: SimulatedData) -> anyhow::Result<Self> {
        Self::from_parts(data.thetas, data.trials)
    }

    ///
    /// Create a data loader from row-aligned parameters and sets
    ///
    pub fn from_parts(thetas: Vec<Vec<f32>>, trials: Vec<TrialSet>) -> anyhow::Result<Self> {
        if thetas.is_empty() {
            return Err(anyhow::anyhow!("no simulations"));
        }
        if thetas.len() != trials.len() {
            return Err(anyhow::anyhow!(
                "{} parameters vs. {} trial sets",
                thetas.len(),
                trials.len()
            ));
        }
        let pp = thetas[0].len();
        if thetas.iter().any(|t| t.len() != pp) {
            return Err(anyhow::anyhow!("parameters must share one dim"));
        }

        let max_trials = trials.iter().map(|s| s.len()).max().unwrap_or(0);
        let rows = (0..thetas.len()).collect();

        Ok(SimulationData {
            thetas,
            trials,
            max_trials,
            shuffled: None,
            minibatches: Minibatches {
                samples: rows,
                chunks: vec![],
            },
        })
    }

    pub fn len(&self) -> usize {
        self.thetas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thetas.is_empty()
    }

    pub fn max_trials(&self) -> usize {
        self.max_trials
    }

    fn take_minibatch(&self, samples: &[usize]) -> anyhow::Result<SetMinibatch> {
        let pp = self.dim_param();
        let theta: Vec<f32> = samples
            .iter()
            .flat_map(|&i| self.thetas[i].iter().copied())
            .collect();
        let sets: Vec<TrialSet> = samples.iter().map(|&i| self.trials[i].clone()).collect();

        Ok(SetMinibatch {
            theta: Tensor::from_vec(theta, (samples.len(), pp), &Device::Cpu)?,
            trials: TrialBatch::from_sets(&sets, Some(self.max_trials), &Device::Cpu)?,
        })
    }
}

impl DataLoader for SimulationData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<SetMinibatch> {
        let shuffled = self
            .shuffled
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("need to shuffle data"))?;

        let mb = shuffled.get(batch_idx).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                shuffled.len()
            )
        })?;

        Ok(SetMinibatch {
            theta: mb.theta.to_device(target_device)?,
            trials: mb.trials.to_device(target_device)?,
        })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn dim_param(&self) -> usize {
        self.thetas[0].len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        /////////////////////
        // shuffle indexes //
        /////////////////////

        self.minibatches.shuffle_minibatch(batch_size)?;

        ///////////////////////////////////
        // preload all the shuffled data //
        ///////////////////////////////////

        let preloaded = self
            .minibatches
            .chunks
            .par_iter()
            .map(|samples| self.take_minibatch(samples))
            .collect::<anyhow::Result<Vec<_>>>()?;

        self.shuffled = Some(preloaded);
        Ok(())
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` hold indexes drawn
/// with replacement, `batch_size` each.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        use rand_distr::{Distribution, Uniform};

        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }

        let mut rng = rand::rng();
        self.samples.shuffle(&mut rng);
        let nbatch = (self.size() + batch_size) / batch_size;
        let ntot = nbatch * batch_size;

        let unif = Uniform::new(0, self.size())?;

        let indexes = (0..ntot)
            .into_par_iter()
            .map_init(rand::rng, |rng, _| self.samples[unif.sample(rng)])
            .collect::<Vec<usize>>();

        self.chunks = indexes
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> anyhow::Result<SimulationData> {
        let thetas = (0..10).map(|i| vec![i as f32, -(i as f32)]).collect();
        let trials = (0..10)
            .map(|i| TrialSet::new(vec![vec![i as f32, 0.]; 1 + i % 3]))
            .collect::<crate::error::Result<Vec<_>>>()?;
        SimulationData::from_parts(thetas, trials)
    }

    #[test]
    fn minibatches_line_up() -> anyhow::Result<()> {
        let mut data = toy_data()?;
        assert!(data.minibatch_data(0, &Device::Cpu).is_err());

        data.shuffle_minibatch(4)?;
        assert_eq!(data.num_minibatch(), 3);
        assert_eq!(data.max_trials(), 3);
        assert_eq!(data.dim_param(), 2);

        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &Device::Cpu)?;
            assert_eq!(mb.theta.dims(), &[4, 2]);
            assert_eq!(mb.trials.values().dims(), &[4, 3, 2]);

            // the first feature of every present trial is the row's θ(0)
            let theta = mb.theta.to_vec2::<f32>()?;
            let x = mb.trials.values().to_vec3::<f32>()?;
            for (t, set) in theta.iter().zip(x.iter()) {
                assert_eq!(set[0][0], t[0]);
            }
        }
        assert!(data.minibatch_data(3, &Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn rejects_misaligned_parts() -> anyhow::Result<()> {
        let trials = vec![TrialSet::new(vec![vec![0.]])?];
        assert!(SimulationData::from_parts(vec![vec![0.], vec![1.]], trials).is_err());
        Ok(())
    }
}
