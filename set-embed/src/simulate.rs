//! Toy priors and iid simulators for building training sets.

use crate::error::{Result, SetEmbedError};
use crate::trial_set::TrialSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

pub trait Prior: Sync {
    fn dim(&self) -> usize;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32>;
}

pub trait Simulator: Sync {
    /// One trial given the parameter `theta`
    fn simulate<R: Rng + ?Sized>(&self, theta: &[f32], rng: &mut R) -> Vec<f32>;
}

/// θ ~ N(0, I)
#[derive(Clone, Debug)]
pub struct StandardNormalPrior {
    dim: usize,
}

impl StandardNormalPrior {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Prior for StandardNormalPrior {
    fn dim(&self) -> usize {
        self.dim
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        (0..self.dim).map(|_| rng.sample(StandardNormal)).collect()
    }
}

/// θ(p) ~ U(low(p), high(p)) independently
#[derive(Clone, Debug)]
pub struct BoxUniformPrior {
    low: Vec<f32>,
    high: Vec<f32>,
}

impl BoxUniformPrior {
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Result<Self> {
        if low.len() != high.len() {
            return Err(SetEmbedError::shape("box bounds", low.len(), high.len()));
        }
        if low.iter().zip(high.iter()).any(|(l, h)| !(l < h)) {
            return Err(SetEmbedError::invalid("box prior needs low < high in every dim"));
        }
        Ok(Self { low, high })
    }
}

impl Prior for BoxUniformPrior {
    fn dim(&self) -> usize {
        self.low.len()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&l, &h)| l + (h - l) * rng.random::<f32>())
            .collect()
    }
}

/// x ~ N(θ, noise_std^2 I); one trial has the parameter's dim
#[derive(Clone, Debug)]
pub struct IidGaussianSimulator {
    noise_std: f32,
}

impl IidGaussianSimulator {
    pub fn new(noise_std: f32) -> Result<Self> {
        if !(noise_std > 0.0) {
            return Err(SetEmbedError::invalid(format!(
                "noise std must be positive, got {}",
                noise_std
            )));
        }
        Ok(Self { noise_std })
    }

    pub fn noise_std(&self) -> f32 {
        self.noise_std
    }

    /// Exact posterior variance per dim after `n` trials under a
    /// standard normal prior: 1 / (1 + n / σ^2)
    pub fn conjugate_posterior_var(&self, n: usize) -> f32 {
        1.0 / (1.0 + n as f32 / (self.noise_std * self.noise_std))
    }
}

impl Simulator for IidGaussianSimulator {
    fn simulate<R: Rng + ?Sized>(&self, theta: &[f32], rng: &mut R) -> Vec<f32> {
        theta
            .iter()
            .map(|&t| {
                let z: f32 = rng.sample(StandardNormal);
                t + self.noise_std * z
            })
            .collect()
    }
}

/// Parameters and their observed trial sets, row-aligned
pub struct SimulatedData {
    pub thetas: Vec<Vec<f32>>,
    pub trials: Vec<TrialSet>,
}

impl SimulatedData {
    pub fn len(&self) -> usize {
        self.thetas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thetas.is_empty()
    }
}

/// `n` iid trials sharing the parameter `theta`
pub fn simulate_trials<S, R>(simulator: &S, theta: &[f32], n: usize, rng: &mut R) -> Result<TrialSet>
where
    S: Simulator,
    R: Rng + ?Sized,
{
    TrialSet::new((0..n).map(|_| simulator.simulate(theta, &mut *rng)).collect())
}

///
/// Simulate `num_simulations` (θ, trial set) pairs
///
/// Each simulation draws θ from the prior, a trial count uniformly in
/// `min_trials..=max_trials`, and pads its set to `max_trials`. Every
/// simulation gets its own generator seeded from `seed` and its index,
/// so the result does not depend on the thread schedule.
///
pub fn simulate_iid_dataset<P, S>(
    prior: &P,
    simulator: &S,
    num_simulations: usize,
    min_trials: usize,
    max_trials: usize,
    seed: u64,
) -> Result<SimulatedData>
where
    P: Prior,
    S: Simulator,
{
    if min_trials == 0 || min_trials > max_trials {
        return Err(SetEmbedError::invalid(format!(
            "need 1 <= min_trials <= max_trials, got {}..={}",
            min_trials, max_trials
        )));
    }

    let pairs = (0..num_simulations)
        .into_par_iter()
        .map(|i| -> Result<(Vec<f32>, TrialSet)> {
            let mut rng =
                StdRng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let theta = prior.sample(&mut rng);
            let n = rng.random_range(min_trials..=max_trials);
            let trials = simulate_trials(simulator, &theta, n, &mut rng)?.padded(max_trials)?;
            Ok((theta, trials))
        })
        .collect::<Result<Vec<_>>>()?;

    let (thetas, trials) = pairs.into_iter().unzip();
    Ok(SimulatedData { thetas, trials })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_is_reproducible_and_padded() -> anyhow::Result<()> {
        let prior = BoxUniformPrior::new(vec![-1., -1.], vec![1., 1.])?;
        let sim = IidGaussianSimulator::new(0.5)?;

        let a = simulate_iid_dataset(&prior, &sim, 64, 1, 8, 7)?;
        let b = simulate_iid_dataset(&prior, &sim, 64, 1, 8, 7)?;
        assert_eq!(a.len(), 64);
        assert_eq!(a.thetas, b.thetas);
        assert_eq!(a.trials, b.trials);

        for (theta, set) in a.thetas.iter().zip(a.trials.iter()) {
            assert!(theta.iter().all(|t| (-1.0..1.0).contains(t)));
            assert_eq!(set.len(), 8);
            assert!((1..=8).contains(&set.num_present()));
            assert_eq!(set.feature_dim(), 2);
        }
        Ok(())
    }

    #[test]
    fn bad_trial_range() -> anyhow::Result<()> {
        let prior = StandardNormalPrior::new(1);
        let sim = IidGaussianSimulator::new(1.0)?;
        assert!(simulate_iid_dataset(&prior, &sim, 4, 0, 3, 0).is_err());
        assert!(simulate_iid_dataset(&prior, &sim, 4, 5, 3, 0).is_err());
        Ok(())
    }

    #[test]
    fn conjugate_variance_shrinks() -> anyhow::Result<()> {
        let sim = IidGaussianSimulator::new(1.0)?;
        approx::assert_abs_diff_eq!(sim.conjugate_posterior_var(1), 0.5, epsilon = 1e-6);
        assert!(sim.conjugate_posterior_var(10) < sim.conjugate_posterior_var(1));
        Ok(())
    }
}
