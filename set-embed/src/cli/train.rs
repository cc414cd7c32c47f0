use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use crate::candle_data_loader::SimulationData;
use crate::candle_gaussian_head::GaussianPosteriorHead;
use crate::candle_inference::TrainConfig;
use crate::candle_model_traits::SetEncoderModuleT;
use crate::candle_npe_inference::{Npe, NpeT};
use crate::candle_set_aggregator::Aggregation;
use crate::candle_set_encoder::{PermutationInvariantEncoder, SetEncoderConfig};
use crate::simulate::*;
use crate::trial_set::TrialSet;

#[derive(Clone, Debug, ValueEnum)]
pub enum AggregationArg {
    /// Σ over present trials; keeps track of how many were seen
    Sum,
    /// average over present trials
    Mean,
}

impl From<&AggregationArg> for Aggregation {
    fn from(arg: &AggregationArg) -> Self {
        match arg {
            AggregationArg::Sum => Aggregation::Sum,
            AggregationArg::Mean => Aggregation::Mean,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, default_value = "2", help = "Parameter (and trial) dim")]
    pub dim: usize,

    #[arg(long, default_value = "1.0", help = "Observation noise sd")]
    pub noise: f32,

    #[arg(long, default_value = "5000")]
    pub num_simulations: usize,

    #[arg(long, default_value = "20", help = "Trial-set ceiling")]
    pub max_trials: usize,

    #[arg(long, default_value = "1")]
    pub min_trials: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![40, 40],
        help = "Per-trial network layers (comma-separated)"
    )]
    pub trial_layers: Vec<usize>,

    #[arg(long, default_value = "20")]
    pub latent_dim: usize,

    #[arg(short, long, default_value = "sum")]
    pub aggregation: AggregationArg,

    #[arg(
        long,
        value_delimiter(','),
        help = "Post-network layers (comma-separated); needs --output-dim"
    )]
    pub post_layers: Vec<usize>,

    #[arg(long, help = "Embedding dim after the post network")]
    pub output_dim: Option<usize>,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![64],
        help = "Posterior head layers (comma-separated)"
    )]
    pub head_layers: Vec<usize>,

    #[arg(long, default_value = "100")]
    pub epochs: usize,

    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.001")]
    pub lr: f32,

    #[arg(short, long, help = "Save trained weights ({output}.safetensors)")]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: &TrainArgs) -> Result<()> {
    let device = if args.gpu {
        #[cfg(feature = "metal")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(all(feature = "cuda", not(feature = "metal")))]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        {
            Device::Cpu
        }
    } else {
        Device::Cpu
    };
    info!("Using device: {:?}", device);

    let prior = StandardNormalPrior::new(args.dim);
    let simulator = IidGaussianSimulator::new(args.noise)?;

    info!(
        "Simulating {} sets of {}..={} trials",
        args.num_simulations, args.min_trials, args.max_trials
    );
    let simulated = simulate_iid_dataset(
        &prior,
        &simulator,
        args.num_simulations,
        args.min_trials,
        args.max_trials,
        args.seed,
    )?;
    let mut data = SimulationData::new(simulated)?;

    let mut config = SetEncoderConfig::new(args.dim, args.max_trials)
        .with_trial_net(&args.trial_layers, args.latent_dim)
        .with_aggregation((&args.aggregation).into());
    config.post_layers = args.post_layers.clone();
    config.output_dim = args.output_dim;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let encoder = PermutationInvariantEncoder::new(config, vb.clone())?;
    let head = GaussianPosteriorHead::new(
        args.dim,
        encoder.dim_output(),
        &args.head_layers,
        vb.clone(),
    )?;
    info!(
        "Encoder: {} -> {:?} -> {:?} -> {}",
        args.dim,
        args.trial_layers,
        encoder.config().aggregation,
        encoder.dim_output()
    );

    let train_config = TrainConfig {
        learning_rate: args.lr,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let mut npe = Npe::build(&encoder, &head, &varmap)?;
    let llik_trace = npe.train(&mut data, &train_config)?;
    if let Some(llik) = llik_trace.last() {
        info!("Final log-likelihood: {}", llik);
    }

    ///////////////////////////////////////////////
    // posterior width as trials accumulate      //
    ///////////////////////////////////////////////

    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));
    let theta = prior.sample(&mut rng);
    let trials: Vec<Vec<f32>> = (0..args.max_trials)
        .map(|_| simulator.simulate(&theta, &mut rng))
        .collect();
    info!("Held-out θ: {:?}", theta);

    for n in 1..=args.max_trials {
        let present = (0..args.max_trials).map(|j| j < n).collect();
        let set = TrialSet::with_mask(trials.clone(), present)?;
        let (mean, var) = npe.posterior_summary(&set, &device)?;
        let sd: Vec<f32> = var.iter().map(|v| v.sqrt()).collect();
        info!(
            "[{}] mean: {:?}, sd: {:?}, conjugate sd: {}",
            n,
            mean,
            sd,
            simulator.conjugate_posterior_var(n).sqrt()
        );
    }

    if let Some(ref p) = args.output {
        let s = p.to_string_lossy();
        let base_str = s.strip_suffix(".safetensors").unwrap_or(&s);
        let path = PathBuf::from(format!("{}.safetensors", base_str));
        varmap.save(&path)?;
        info!("Saved weights to {:?}", path);
    }

    info!("Done");
    Ok(())
}
