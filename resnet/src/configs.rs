use anyhow::{ensure, Result};


#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub data_dir: &'static str,
    pub plot_path: &'static str,
    pub batch_size: i64,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub num_classes: i64,
    pub seed: Option<u64>,
    pub log_every: usize,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch size must be positive, got {}", self.batch_size);
        ensure!(self.n_epochs > 0, "epoch count must be positive");
        ensure!(self.learning_rate > 0.0, "learning rate must be positive, got {}", self.learning_rate);
        ensure!((0.0..1.0).contains(&self.momentum), "momentum must lie in [0, 1), got {}", self.momentum);
        ensure!(self.num_classes > 1, "need at least two classes, got {}", self.num_classes);
        ensure!(self.log_every > 0, "log interval must be positive");
        Ok(())
    }
}



// Plain SGD run on CIFAR-10, batch of 4 images
pub const CIFAR10_CONFIG: Config = Config {
    data_dir: "data",
    plot_path: "training_loss.svg",
    batch_size: 4,
    n_epochs: 10,
    learning_rate: 1e-3,
    momentum: 0.9,
    num_classes: 10,            // airplane .. truck
    seed: Some(42),
    log_every: 2000,
};



// Single epoch with bigger batches, for checking the pipeline end to end
pub const SMOKE_CONFIG: Config = Config {
    data_dir: "data",
    plot_path: "training_loss_smoke.svg",
    batch_size: 64,
    n_epochs: 1,
    learning_rate: 1e-2,
    momentum: 0.9,
    num_classes: 10,
    seed: Some(0),
    log_every: 100,
};
