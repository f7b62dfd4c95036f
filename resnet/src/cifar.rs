//! CIFAR-10 on disk: fetch the binary release once, then load it as tensors.
//!
//! The cache layout is the one the upstream archive unpacks to:
//! `<data_dir>/cifar-10-binary.tar.gz` and `<data_dir>/cifar-10-batches-bin/`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tch::{vision, Tensor};
use tracing::info;

use crate::batches::BatchLoader;


const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
const ARCHIVE_NAME: &str = "cifar-10-binary.tar.gz";
const EXTRACTED_DIR: &str = "cifar-10-batches-bin";
const EXTRACT_STAGING: &str = ".cifar-10-extract";
const BATCH_FILES: [&str; 6] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
    "test_batch.bin",
];
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// Per-channel mean and std applied to every image after scaling to [0, 1]
const CHANNEL_MEAN: f64 = 0.5;
const CHANNEL_STD: f64 = 0.5;

pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];


pub struct Cifar10 {
    pub train_images: Tensor,
    pub train_labels: Tensor,
    pub test_images: Tensor,
    pub test_labels: Tensor,
}

impl Cifar10 {
    /// Shuffled every epoch, full batches only.
    pub fn train_source(&self, batch_size: i64, seed: Option<u64>) -> Result<BatchLoader> {
        Ok(BatchLoader::new(&self.train_images, &self.train_labels, batch_size)?.shuffle(seed))
    }

    /// Fixed order, keeps the short trailing batch so every test image is scored.
    pub fn test_source(&self, batch_size: i64) -> Result<BatchLoader> {
        Ok(BatchLoader::new(&self.test_images, &self.test_labels, batch_size)?.keep_last(true))
    }

    pub fn n_train(&self) -> i64 {
        self.train_labels.size()[0]
    }

    pub fn n_test(&self) -> i64 {
        self.test_labels.size()[0]
    }
}


pub fn normalize(images: &Tensor) -> Tensor {
    (images - CHANNEL_MEAN) / CHANNEL_STD
}


pub fn batches_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(EXTRACTED_DIR)
}


/// True once every binary batch file is present in `dir`.
pub fn is_complete(dir: &Path) -> bool {
    BATCH_FILES.iter().all(|name| dir.join(name).is_file())
}


/// Download and unpack the dataset unless it is already cached under `data_dir`.
pub fn download(data_dir: &Path) -> Result<PathBuf> {
    let extracted = batches_dir(data_dir);
    if is_complete(&extracted) {
        info!(path = %extracted.display(), "CIFAR-10 already cached");
        return Ok(extracted);
    }

    fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let archive = data_dir.join(ARCHIVE_NAME);
    if !archive.is_file() {
        info!(url = CIFAR10_URL, "downloading CIFAR-10");
        let response = http_client()?
            .get(CIFAR10_URL)
            .send()
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("fetching {}", CIFAR10_URL))?;
        let n_bytes = write_atomically(response, &archive)?;
        info!(bytes = n_bytes, "download complete");
    }

    unpack(&archive, data_dir)?;
    Ok(extracted)
}


/// Only the connect phase is bounded; the archive body may take as long as the link needs.
fn http_client() -> Result<reqwest::blocking::Client> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None::<Duration>)
        .build()
        .context("building HTTP client")?;
    Ok(client)
}


/// Streams `reader` into `<dest>.part`, then renames it to `dest`.
/// A failed transfer never leaves a file at `dest`.
fn write_atomically<R: Read>(mut reader: R, dest: &Path) -> Result<u64> {
    let partial = dest.with_extension("part");
    let mut file = File::create(&partial)
        .with_context(|| format!("creating {}", partial.display()))?;
    let n_bytes = match io::copy(&mut reader, &mut file) {
        Ok(n_bytes) => n_bytes,
        Err(err) => {
            drop(file);
            let _ = fs::remove_file(&partial);
            return Err(err).with_context(|| format!("writing {}", partial.display()));
        }
    };
    file.sync_all()
        .with_context(|| format!("flushing {}", partial.display()))?;
    fs::rename(&partial, dest)
        .with_context(|| format!("moving {} into place", dest.display()))?;
    Ok(n_bytes)
}


/// Extracts into a staging dir under `data_dir` and moves the batches dir into place
/// only after the whole archive has been read.
fn unpack(archive: &Path, data_dir: &Path) -> Result<()> {
    info!(archive = %archive.display(), "extracting CIFAR-10");
    let staging = data_dir.join(EXTRACT_STAGING);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("clearing {}", staging.display()))?;
    }

    let tar_gz = File::open(archive)
        .with_context(|| format!("opening {}", archive.display()))?;
    tar::Archive::new(GzDecoder::new(tar_gz))
        .unpack(&staging)
        .with_context(|| format!("extracting {}", archive.display()))?;

    let unpacked = staging.join(EXTRACTED_DIR);
    anyhow::ensure!(
        is_complete(&unpacked),
        "{} does not contain all CIFAR-10 batch files",
        archive.display()
    );

    let extracted = batches_dir(data_dir);
    if extracted.exists() {
        fs::remove_dir_all(&extracted)
            .with_context(|| format!("removing incomplete {}", extracted.display()))?;
    }
    fs::rename(&unpacked, &extracted)
        .with_context(|| format!("moving {} into place", extracted.display()))?;
    fs::remove_dir_all(&staging)
        .with_context(|| format!("clearing {}", staging.display()))?;
    Ok(())
}


pub fn load(data_dir: &Path) -> Result<Cifar10> {
    let dir = download(data_dir)?;
    let ds = vision::cifar::load_dir(&dir)
        .with_context(|| format!("reading CIFAR-10 batches from {}", dir.display()))?;

    let data = Cifar10 {
        train_images: normalize(&ds.train_images),
        train_labels: ds.train_labels,
        test_images: normalize(&ds.test_images),
        test_labels: ds.test_labels,
    };
    info!(train = data.n_train(), test = data.n_test(), "CIFAR-10 loaded");
    Ok(data)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::batches::BatchSource;
    use tch::{Device, Kind};

    #[test]
    fn normalize_maps_unit_range_to_symmetric() {
        let xs = Tensor::of_slice(&[0.0f32, 0.5, 1.0]);
        let ys = Vec::<f32>::from(&normalize(&xs));
        assert_eq!(ys, vec![-1.0, 0.0, 1.0]);
    }

    fn write_batch_files(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        for name in BATCH_FILES {
            fs::write(dir.join(name), b"batch").unwrap();
        }
    }

    // archive shaped like the upstream release, optionally missing the test batch
    fn write_archive(path: &Path, with_test_batch: bool) {
        let archive = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(archive, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for name in BATCH_FILES {
            if name == "test_batch.bin" && !with_test_batch {
                continue;
            }
            let payload = format!("contents of {}", name);
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/{}", EXTRACTED_DIR, name), payload.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "link dropped"));
            }
            self.served = true;
            buf[..4].copy_from_slice(b"head");
            Ok(4)
        }
    }

    #[test]
    fn complete_cache_skips_download() {
        let tmp = tempfile::tempdir().unwrap();
        write_batch_files(&batches_dir(tmp.path()));

        let dir = download(tmp.path()).unwrap();
        assert_eq!(dir, batches_dir(tmp.path()));
        assert!(!tmp.path().join(ARCHIVE_NAME).exists());
    }

    #[test]
    fn cached_archive_is_unpacked() {
        let tmp = tempfile::tempdir().unwrap();
        write_archive(&tmp.path().join(ARCHIVE_NAME), true);

        let dir = download(tmp.path()).unwrap();
        assert!(is_complete(&dir));
        assert!(!tmp.path().join(EXTRACT_STAGING).exists());
    }

    #[test]
    fn half_extracted_dir_is_extracted_again() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = batches_dir(tmp.path());
        fs::create_dir_all(&extracted).unwrap();
        fs::write(extracted.join("data_batch_1.bin"), b"trunc").unwrap();
        write_archive(&tmp.path().join(ARCHIVE_NAME), true);

        let dir = download(tmp.path()).unwrap();
        assert!(is_complete(&dir));
        let first = fs::read_to_string(dir.join("data_batch_1.bin")).unwrap();
        assert_eq!(first, "contents of data_batch_1.bin");
    }

    #[test]
    fn archive_missing_batches_leaves_no_cache() {
        let tmp = tempfile::tempdir().unwrap();
        write_archive(&tmp.path().join(ARCHIVE_NAME), false);

        assert!(download(tmp.path()).is_err());
        assert!(!batches_dir(tmp.path()).exists());
    }

    #[test]
    fn streamed_write_lands_only_when_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join(ARCHIVE_NAME);

        assert!(write_atomically(FailingReader { served: false }, &dest).is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());

        let n_bytes = write_atomically(io::Cursor::new(b"archive bytes".to_vec()), &dest).unwrap();
        assert_eq!(n_bytes, 13);
        assert_eq!(fs::read(&dest).unwrap(), b"archive bytes");
    }

    #[test]
    fn http_client_builds_without_total_timeout() {
        assert!(http_client().is_ok());
    }

    #[test]
    fn sources_split_batches_as_configured() {
        let data = Cifar10 {
            train_images: Tensor::zeros(&[10, 3, 32, 32], (Kind::Float, Device::Cpu)),
            train_labels: Tensor::zeros(&[10], (Kind::Int64, Device::Cpu)),
            test_images: Tensor::zeros(&[10, 3, 32, 32], (Kind::Float, Device::Cpu)),
            test_labels: Tensor::zeros(&[10], (Kind::Int64, Device::Cpu)),
        };
        assert_eq!(data.train_source(4, Some(1)).unwrap().num_batches(), 2);
        assert_eq!(data.test_source(4).unwrap().num_batches(), 3);
    }

    #[test]
    fn ten_classes() {
        assert_eq!(CLASS_NAMES.len(), 10);
        assert_eq!(CLASS_NAMES[3], "cat");
    }
}
