use anyhow::{bail, ensure, Result};
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::{Kind, Tensor};
use tracing::debug;

use crate::batches::BatchSource;


/// One parameter update per batch, driven by that batch's loss.
pub trait UpdateRule {
    fn step(&mut self, loss: &Tensor);
}

impl UpdateRule for nn::Optimizer {
    fn step(&mut self, loss: &Tensor) {
        // zero_grad, backward, step
        self.backward_step(loss);
    }
}


pub fn sgd(vs: &nn::VarStore, lr: f64, momentum: f64) -> Result<nn::Optimizer> {
    let opt = nn::Sgd {
        momentum,
        ..Default::default()
    }
    .build(vs, lr)?;
    Ok(opt)
}


/// Mean cross entropy of raw class scores against integer labels.
pub fn cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let loss = logits
        .f_log_softmax(-1, Kind::Float)?
        .f_nll_loss(labels, None::<Tensor>, tch::Reduction::Mean, -100)?;
    Ok(loss)
}


/// Runs `n_epochs` full passes over `source` and returns the mean batch loss of each pass.
pub fn train_model<M, L, U>(
    model: &M,
    source: &mut dyn BatchSource,
    loss_fn: L,
    update: &mut U,
    n_epochs: usize,
    log_every: usize,
    ) -> Result<Vec<f64>>
where
    M: ModuleT,
    L: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    U: UpdateRule + ?Sized,
{
    ensure!(n_epochs > 0, "epoch count must be positive");
    let log_every = log_every.max(1);

    let mut losses = Vec::with_capacity(n_epochs);
    for epoch in 0..n_epochs {
        let mut running_loss = 0.0;
        let mut n_batches = 0usize;

        for batch in source.batches() {
            let scores = model.forward_t(&batch.images, true);
            let loss = loss_fn(&scores, &batch.labels)?;
            let loss_value = loss.f_double_value(&[])?;
            if !loss_value.is_finite() {
                bail!("loss diverged to {} at epoch {} batch {}", loss_value, epoch + 1, n_batches + 1);
            }

            update.step(&loss);

            running_loss += loss_value;
            n_batches += 1;
            if n_batches % log_every == 0 {
                debug!(epoch = epoch + 1, batch = n_batches, loss = running_loss / n_batches as f64, "running loss");
            }
        }

        ensure!(n_batches > 0, "batch source produced no batches in epoch {}", epoch + 1);
        let epoch_loss = running_loss / n_batches as f64;
        losses.push(epoch_loss);
        println!("[Epoch {}] loss: {}", epoch + 1, epoch_loss);
    }

    println!("Finished Training");
    Ok(losses)
}
