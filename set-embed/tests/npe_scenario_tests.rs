use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;

use set_embed::candle_data_loader::SimulationData;
use set_embed::candle_gaussian_head::GaussianPosteriorHead;
use set_embed::candle_inference::TrainConfig;
use set_embed::candle_model_traits::SetEncoderModuleT;
use set_embed::candle_npe_inference::{Npe, NpeT};
use set_embed::simulate::*;
use set_embed::{Aggregation, PermutationInvariantEncoder, SetEncoderConfig, TrialSet};

#[test]
fn posterior_narrows_with_more_trials() -> anyhow::Result<()> {
    let max_trials = 10;
    let prior = StandardNormalPrior::new(1);
    let simulator = IidGaussianSimulator::new(1.0)?;
    let simulated = simulate_iid_dataset(&prior, &simulator, 2000, 1, max_trials, 11)?;
    let mut data = SimulationData::new(simulated)?;

    let dev = Device::Cpu;
    let vm = VarMap::new();
    let vs = VarBuilder::from_varmap(&vm, DType::F32, &dev);
    let config = SetEncoderConfig::new(1, max_trials)
        .with_trial_net(&[16], 8)
        .with_aggregation(Aggregation::Sum);
    let encoder = PermutationInvariantEncoder::new(config, vs.clone())?;
    let head = GaussianPosteriorHead::new(1, encoder.dim_output(), &[16], vs)?;

    let train_config = TrainConfig {
        learning_rate: 5e-3,
        batch_size: 100,
        num_epochs: 30,
        show_progress: false,
        ..TrainConfig::default()
    };

    let mut npe = Npe::build(&encoder, &head, &vm)?;
    let trace = npe.train(&mut data, &train_config)?;
    assert_eq!(trace.len(), 30);
    assert!(trace.iter().all(|x| x.is_finite()));
    assert!(trace[29] > trace[0]);

    // average over held-out parameters: one trial vs. all of them
    let mut rng = StdRng::seed_from_u64(99);
    let (mut var_first, mut var_all) = (0_f32, 0_f32);
    let num_tests = 20;
    for _ in 0..num_tests {
        let theta = prior.sample(&mut rng);
        let trials: Vec<Vec<f32>> = (0..max_trials)
            .map(|_| simulator.simulate(&theta, &mut rng))
            .collect();

        let one = (0..max_trials).map(|j| j == 0).collect();
        let one = TrialSet::with_mask(trials.clone(), one)?;
        let all = TrialSet::new(trials)?;

        var_first += npe.posterior_summary(&one, &dev)?.1[0];
        var_all += npe.posterior_summary(&all, &dev)?.1[0];
    }

    assert!(var_all / (num_tests as f32) < var_first / (num_tests as f32));
    Ok(())
}

#[test]
fn mismatched_head_is_rejected() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let vm = VarMap::new();
    let vs = VarBuilder::from_varmap(&vm, DType::F32, &dev);
    let encoder = PermutationInvariantEncoder::new(SetEncoderConfig::new(2, 5), vs.clone())?;
    let head = GaussianPosteriorHead::new(2, encoder.dim_output() + 1, &[], vs)?;
    assert!(Npe::build(&encoder, &head, &vm).is_err());
    Ok(())
}

#[test]
fn head_must_match_parameter_dim() -> anyhow::Result<()> {
    let prior = StandardNormalPrior::new(1);
    let simulator = IidGaussianSimulator::new(1.0)?;
    let simulated = simulate_iid_dataset(&prior, &simulator, 50, 1, 4, 3)?;
    let mut data = SimulationData::new(simulated)?;

    let dev = Device::Cpu;
    let vm = VarMap::new();
    let vs = VarBuilder::from_varmap(&vm, DType::F32, &dev);
    let encoder = PermutationInvariantEncoder::new(SetEncoderConfig::new(1, 4), vs.clone())?;
    let head = GaussianPosteriorHead::new(2, encoder.dim_output(), &[], vs)?;

    let train_config = TrainConfig {
        num_epochs: 1,
        batch_size: 10,
        show_progress: false,
        ..TrainConfig::default()
    };

    let mut npe = Npe::build(&encoder, &head, &vm)?;
    let err = npe.train(&mut data, &train_config).unwrap_err();
    assert!(err.to_string().contains("parameter dim 1 vs. density parameter dim 2"));
    Ok(())
}
