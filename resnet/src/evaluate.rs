use std::fmt;

use anyhow::Result;
use tch::nn::ModuleT;
use tch::{Kind, Tensor};

use crate::batches::BatchSource;


#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: i64,
    pub total: i64,
}

impl Accuracy {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.total as f64
    }

    fn add(&mut self, correct: i64, total: i64) {
        self.correct += correct;
        self.total += total;
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}%)", self.correct, self.total, self.percent())
    }
}


/// Number of rows whose highest score sits at the true label.
/// Ties go to the first maximal index.
pub fn batch_correct(logits: &Tensor, labels: &Tensor) -> Result<i64> {
    let predicted = logits.f_argmax(-1, false)?;
    let correct = predicted
        .f_eq_tensor(labels)?
        .f_sum(Kind::Int64)?
        .f_int64_value(&[])?;
    Ok(correct)
}


/// One ordered pass over `source` in inference mode, with gradient tracking off.
pub fn evaluate_model<M: ModuleT>(model: &M, source: &mut dyn BatchSource) -> Result<Accuracy> {
    tch::no_grad(|| {
        let mut accuracy = Accuracy::default();
        for batch in source.batches() {
            let scores = model.forward_t(&batch.images, false);
            let correct = batch_correct(&scores, &batch.labels)?;
            accuracy.add(correct, batch.len());
        }
        Ok(accuracy)
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::batches::BatchLoader;
    use tch::{nn, Device};

    #[test]
    fn all_match_is_hundred_none_is_zero() {
        let logits = Tensor::of_slice(&[
            0.9f32, 0.1, 0.0,
            0.0, 0.8, 0.2,
            0.1, 0.2, 0.7,
            0.6, 0.3, 0.1,
        ]).view([4, 3]);

        let labels = Tensor::of_slice(&[0i64, 1, 2, 0]);
        let hits = batch_correct(&logits, &labels).unwrap();
        assert_eq!(Accuracy { correct: hits, total: 4 }.percent(), 100.0);

        let labels = Tensor::of_slice(&[1i64, 2, 0, 2]);
        let hits = batch_correct(&logits, &labels).unwrap();
        assert_eq!(Accuracy { correct: hits, total: 4 }.percent(), 0.0);
    }

    #[test]
    fn ties_go_to_first_index() {
        let logits = Tensor::of_slice(&[0.5f32, 0.5, 0.0]).view([1, 3]);
        assert_eq!(batch_correct(&logits, &Tensor::of_slice(&[0i64])).unwrap(), 1);
        assert_eq!(batch_correct(&logits, &Tensor::of_slice(&[1i64])).unwrap(), 0);
    }

    #[test]
    fn empty_accuracy_is_zero() {
        assert_eq!(Accuracy::default().percent(), 0.0);
    }

    #[test]
    fn displays_counts_and_percent() {
        let accuracy = Accuracy { correct: 3, total: 4 };
        assert_eq!(accuracy.to_string(), "3/4 (75%)");
    }

    #[test]
    fn counts_every_sample_including_short_batch() {
        // the input itself is the score vector, so label 1 is always predicted
        let n = 10;
        let images = Tensor::of_slice(&[0.0f32, 1.0, 0.0]).unsqueeze(0).repeat(&[n, 1]);
        let labels = Tensor::of_slice(&[1i64, 1, 1, 1, 1, 1, 0, 0, 2, 2]);
        let mut source = BatchLoader::new(&images, &labels, 4).unwrap().keep_last(true);
        let model = nn::func_t(|xs, _train| xs.shallow_clone());

        let accuracy = evaluate_model(&model, &mut source).unwrap();

        assert_eq!(accuracy, Accuracy { correct: 6, total: 10 });
        assert!((accuracy.percent() - 60.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&accuracy.percent()));
    }

    #[test]
    fn runs_without_gradients() {
        let vs = nn::VarStore::new(Device::Cpu);
        let linear = nn::linear(vs.root(), 3, 3, Default::default());
        let model = nn::func_t(move |xs, _train| {
            let ys = xs.apply(&linear);
            assert!(!ys.requires_grad());
            ys
        });
        let images = Tensor::ones(&[4, 3], (Kind::Float, Device::Cpu));
        let labels = Tensor::zeros(&[4], (Kind::Int64, Device::Cpu));
        let mut source = BatchLoader::new(&images, &labels, 2).unwrap();

        let accuracy = evaluate_model(&model, &mut source).unwrap();
        assert_eq!(accuracy.total, 4);
    }
}
