pub mod train;

use clap::{Parser, Subcommand};

pub use train::{AggregationArg, TrainArgs};

#[derive(Parser)]
#[command(name = "set-embed")]
#[command(about = "Permutation-invariant embedding of iid trial sets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a set encoder by neural posterior estimation on simulated data
    Train(TrainArgs),
}
