use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::{Device, Tensor};


#[derive(Debug)]
pub struct Batch {
    pub images: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> i64 {
        self.labels.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


/// Anything that can hand out one full pass of batches at a time.
pub trait BatchSource {
    fn num_batches(&self) -> usize;

    /// Starts a new pass. The order of the pass is fixed when this is called.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}


/// Slices batches out of an in-memory image/label pair.
pub struct BatchLoader {
    images: Tensor,
    labels: Tensor,
    batch_size: i64,
    rng: Option<StdRng>,
    keep_last: bool,
    device: Device,
}

impl BatchLoader {
    pub fn new(images: &Tensor, labels: &Tensor, batch_size: i64) -> Result<Self> {
        ensure!(batch_size > 0, "batch size must be positive, got {}", batch_size);
        ensure!(labels.dim() == 1, "labels must be a 1-d tensor, got shape {:?}", labels.size());
        ensure!(images.dim() >= 1, "images need a leading sample dimension");
        let n_images = images.size()[0];
        let n_labels = labels.size()[0];
        ensure!(
            n_images == n_labels,
            "got {} images but {} labels",
            n_images,
            n_labels
        );

        Ok(BatchLoader {
            images: images.shallow_clone(),
            labels: labels.shallow_clone(),
            batch_size,
            rng: None,
            keep_last: false,
            device: Device::Cpu,
        })
    }

    /// Reshuffle at the start of every pass. Without a seed the order differs run to run.
    pub fn shuffle(mut self, seed: Option<u64>) -> Self {
        self.rng = Some(match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        });
        self
    }

    /// Also yield the trailing batch when it is shorter than `batch_size`.
    pub fn keep_last(mut self, keep_last: bool) -> Self {
        self.keep_last = keep_last;
        self
    }

    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn len(&self) -> usize {
        self.labels.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pass_order(&mut self) -> Vec<i64> {
        let mut order: Vec<i64> = (0..self.len() as i64).collect();
        if let Some(rng) = self.rng.as_mut() {
            order.shuffle(rng);
        }
        order
    }
}

impl BatchSource for BatchLoader {
    fn num_batches(&self) -> usize {
        let batch_size = self.batch_size as usize;
        match self.keep_last {
            true => (self.len() + batch_size - 1) / batch_size,
            false => self.len() / batch_size,
        }
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let order = self.pass_order();
        let n_batches = self.num_batches();
        let batch_size = self.batch_size as usize;
        let device = self.device;
        let images = &self.images;
        let labels = &self.labels;

        Box::new((0..n_batches).map(move |idx| {
            let start = idx * batch_size;
            let end = usize::min(start + batch_size, order.len());
            let idxs = Tensor::of_slice(&order[start..end]);
            Batch {
                images: images.index_select(0, &idxs).to_device(device),
                labels: labels.index_select(0, &idxs).to_device(device),
            }
        }))
    }
}
