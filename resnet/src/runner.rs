use std::path::Path;

use anyhow::Result;
use tch::{nn, Device};
use tracing::info;

use crate::cifar;
use crate::configs::Config;
use crate::evaluate::{evaluate_model, Accuracy};
use crate::plot::plot_training_curve;
use crate::resnet::resnet18;
use crate::train::{cross_entropy, sgd, train_model};


pub struct RunSummary {
    pub losses: Vec<f64>,
    pub accuracy: Accuracy,
}


/// Train, plot the loss curve, then score the test split.
pub fn run(config: &Config) -> Result<RunSummary> {
    config.validate()?;

    if let Some(seed) = config.seed {
        tch::manual_seed(seed as i64);
    }
    let device = Device::cuda_if_available();
    info!(?device, batch_size = config.batch_size, epochs = config.n_epochs, "starting run");

    let data = cifar::load(Path::new(config.data_dir))?;
    let mut train_source = data.train_source(config.batch_size, config.seed)?.to_device(device);
    let mut test_source = data.test_source(config.batch_size)?.to_device(device);

    let vs = nn::VarStore::new(device);
    let net = resnet18(&vs.root(), config.num_classes);
    let mut opt = sgd(&vs, config.learning_rate, config.momentum)?;

    let losses = train_model(
        &net,
        &mut train_source,
        cross_entropy,
        &mut opt,
        config.n_epochs,
        config.log_every,
    )?;
    plot_training_curve(&losses, Path::new(config.plot_path))?;

    let accuracy = evaluate_model(&net, &mut test_source)?;
    info!(%accuracy, "evaluation done");
    println!(
        "Accuracy of the network on the {} test images: {}%",
        accuracy.total,
        accuracy.percent()
    );

    Ok(RunSummary { losses, accuracy })
}
