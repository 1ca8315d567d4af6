//! Fashion-MNIST loading and preprocessing
//!
//! Reads the four IDX files of the dataset (gzip or raw), adds the channel
//! axis, scales pixels to [0, 1] and one-hot encodes labels.

pub mod idx;

use ndarray::{Array2, Array4};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, TunerError};
use idx::{read_idx_file, IMAGE_MAGIC, LABEL_MAGIC};

/// Class names in label order
pub const LABEL_NAMES: [&str; 10] = [
    "top", "trouser", "pullover", "dress", "coat", "sandal", "shirt", "sneaker", "bag", "ankle boot",
];

/// Base URL of the public mirror the files are downloaded from
pub const MIRROR_URL: &str = "https://storage.googleapis.com/tensorflow/tf-keras-datasets/";

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";
const FILES: [&str; 4] = [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS];

/// Raw split: images as (N, H, W) bytes, labels as class indices
#[derive(Debug, Clone)]
pub struct RawSplit {
    pub images: Vec<u8>,
    pub labels: Vec<usize>,
    pub n_samples: usize,
    pub height: usize,
    pub width: usize,
}

impl RawSplit {
    fn from_idx(images: idx::IdxArray, labels: idx::IdxArray) -> Result<Self> {
        if images.dims.len() != 3 {
            return Err(TunerError::ShapeError {
                expected: "3-dimensional image array".to_string(),
                actual: format!("{:?}", images.dims),
            });
        }
        if labels.dims.len() != 1 {
            return Err(TunerError::ShapeError {
                expected: "1-dimensional label array".to_string(),
                actual: format!("{:?}", labels.dims),
            });
        }
        if images.dims[0] != labels.dims[0] {
            return Err(TunerError::DataError(format!(
                "{} images but {} labels",
                images.dims[0], labels.dims[0]
            )));
        }

        Ok(Self {
            n_samples: images.dims[0],
            height: images.dims[1],
            width: images.dims[2],
            images: images.data,
            labels: labels.data.into_iter().map(usize::from).collect(),
        })
    }
}

/// Normalized, model-ready dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    /// (N, H, W, 1) in [0, 1]
    pub train_x: Array4<f32>,
    /// (N, num_classes) one-hot
    pub train_y: Array2<f32>,
    pub test_x: Array4<f32>,
    pub test_y: Array2<f32>,
    /// Test labels as class indices, for reporting
    pub test_labels: Vec<usize>,
}

impl Dataset {
    /// Build from raw splits: add channel axis, scale, one-hot encode
    pub fn from_raw(train: &RawSplit, test: &RawSplit, num_classes: usize) -> Result<Self> {
        Ok(Self {
            train_x: add_channel_and_scale(train)?,
            train_y: to_categorical(&train.labels, num_classes)?,
            test_x: add_channel_and_scale(test)?,
            test_y: to_categorical(&test.labels, num_classes)?,
            test_labels: test.labels.clone(),
        })
    }

    pub fn n_train(&self) -> usize {
        self.train_x.shape()[0]
    }

    pub fn n_test(&self) -> usize {
        self.test_x.shape()[0]
    }
}

/// Fashion-MNIST files in a local directory
#[derive(Debug, Clone)]
pub struct FashionMnist {
    dir: PathBuf,
}

impl FashionMnist {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a dataset file, preferring the gzip form
    fn locate(&self, stem: &str) -> Option<PathBuf> {
        let gz = self.dir.join(format!("{}.gz", stem));
        if gz.exists() {
            return Some(gz);
        }
        let raw = self.dir.join(stem);
        raw.exists().then_some(raw)
    }

    /// Names of files not present locally
    pub fn missing_files(&self) -> Vec<&'static str> {
        FILES.iter().copied().filter(|f| self.locate(f).is_none()).collect()
    }

    /// Load the train and test splits
    pub fn load(&self) -> Result<(RawSplit, RawSplit)> {
        let missing = self.missing_files();
        if !missing.is_empty() {
            return Err(TunerError::DataError(format!(
                "missing Fashion-MNIST files in {}: {} (run with --download or fetch them from {})",
                self.dir.display(),
                missing.join(", "),
                MIRROR_URL
            )));
        }

        let train = self.load_split(TRAIN_IMAGES, TRAIN_LABELS)?;
        let test = self.load_split(TEST_IMAGES, TEST_LABELS)?;
        info!(
            train = train.n_samples,
            test = test.n_samples,
            height = train.height,
            width = train.width,
            "Loaded Fashion-MNIST"
        );
        Ok((train, test))
    }

    fn load_split(&self, images: &str, labels: &str) -> Result<RawSplit> {
        let image_path = self.locate(images).ok_or_else(|| missing(images))?;
        let label_path = self.locate(labels).ok_or_else(|| missing(labels))?;
        debug!(images = %image_path.display(), labels = %label_path.display(), "Reading split");

        let images = read_idx_file(&image_path)?;
        check_magic(&images, IMAGE_MAGIC, &image_path)?;
        let labels = read_idx_file(&label_path)?;
        check_magic(&labels, LABEL_MAGIC, &label_path)?;

        RawSplit::from_idx(images, labels)
    }

    /// Download any missing `.gz` files from the mirror
    pub fn download(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| TunerError::DownloadError(e.to_string()))?;

        for stem in self.missing_files() {
            let name = format!("{}.gz", stem);
            let url = format!("{}{}", MIRROR_URL, name);
            info!(url = %url, "Downloading");

            let response = client
                .get(&url)
                .send()
                .and_then(|r| r.error_for_status())
                .map_err(|e| TunerError::DownloadError(format!("{}: {}", url, e)))?;
            let bytes = response
                .bytes()
                .map_err(|e| TunerError::DownloadError(format!("{}: {}", url, e)))?;

            // write then rename so an interrupted download is not mistaken for a dataset file
            let target = self.dir.join(&name);
            let partial = self.dir.join(format!("{}.part", name));
            std::fs::write(&partial, &bytes)?;
            std::fs::rename(&partial, &target)?;
        }
        Ok(())
    }

    pub fn load_or_download(&self) -> Result<(RawSplit, RawSplit)> {
        if !self.missing_files().is_empty() {
            self.download()?;
        }
        self.load()
    }
}

fn missing(stem: &str) -> TunerError {
    TunerError::DataError(format!("dataset file {} not found", stem))
}

fn check_magic(arr: &idx::IdxArray, magic: u32, path: &Path) -> Result<()> {
    let n_dims = (magic & 0xff) as usize;
    if arr.dims.len() != n_dims {
        return Err(TunerError::DataError(format!(
            "{}: expected {} dimensions, found {}",
            path.display(),
            n_dims,
            arr.dims.len()
        )));
    }
    Ok(())
}

/// Reshape (N, H, W) bytes to (N, H, W, 1) floats in [0, 1]
pub fn add_channel_and_scale(split: &RawSplit) -> Result<Array4<f32>> {
    let data: Vec<f32> = split.images.iter().map(|&p| p as f32 / 255.0).collect();
    Ok(Array4::from_shape_vec(
        (split.n_samples, split.height, split.width, 1),
        data,
    )?)
}

/// One-hot encode class indices
pub fn to_categorical(labels: &[usize], num_classes: usize) -> Result<Array2<f32>> {
    let mut out = Array2::zeros((labels.len(), num_classes));
    for (i, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(TunerError::InvalidParameter {
                name: "label".to_string(),
                value: label.to_string(),
                reason: format!("out of range for {} classes", num_classes),
            });
        }
        out[[i, label]] = 1.0;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use idx::encode_idx;

    fn write_split(dir: &Path, images: &str, labels: &str, n: usize) {
        let pixels: Vec<u8> = (0..n * 4 * 4).map(|i| (i % 256) as u8).collect();
        let lbls: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
        std::fs::write(dir.join(images), encode_idx(IMAGE_MAGIC, &[n as u32, 4, 4], &pixels)).unwrap();
        std::fs::write(dir.join(labels), encode_idx(LABEL_MAGIC, &[n as u32], &lbls)).unwrap();
    }

    #[test]
    fn test_to_categorical() {
        let y = to_categorical(&[0, 2, 1], 3).unwrap();
        assert_eq!(y.shape(), &[3, 3]);
        assert_eq!(y[[0, 0]], 1.0);
        assert_eq!(y[[1, 2]], 1.0);
        assert_eq!(y[[2, 1]], 1.0);
        assert_eq!(y.sum(), 3.0);
    }

    #[test]
    fn test_to_categorical_out_of_range() {
        assert!(to_categorical(&[0, 10], 10).is_err());
    }

    #[test]
    fn test_scaling_and_channel() {
        let split = RawSplit {
            images: vec![0, 255, 51, 102],
            labels: vec![1],
            n_samples: 1,
            height: 2,
            width: 2,
        };
        let x = add_channel_and_scale(&split).unwrap();
        assert_eq!(x.shape(), &[1, 2, 2, 1]);
        assert_eq!(x[[0, 0, 1, 0]], 1.0);
        assert!((x[[0, 1, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 12);
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 5);

        let mnist = FashionMnist::new(dir.path());
        assert!(mnist.missing_files().is_empty());
        let (train, test) = mnist.load().unwrap();
        assert_eq!(train.n_samples, 12);
        assert_eq!(test.n_samples, 5);

        let dataset = Dataset::from_raw(&train, &test, 10).unwrap();
        assert_eq!(dataset.train_x.shape(), &[12, 4, 4, 1]);
        assert_eq!(dataset.train_y.shape(), &[12, 10]);
        assert_eq!(dataset.test_labels, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_missing_files_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), TRAIN_IMAGES, TRAIN_LABELS, 3);

        let mnist = FashionMnist::new(dir.path());
        assert_eq!(mnist.missing_files(), vec![TEST_IMAGES, TEST_LABELS]);
        let err = mnist.load().unwrap_err();
        assert!(err.to_string().contains("t10k-images-idx3-ubyte"));
    }

    #[test]
    fn test_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(TRAIN_IMAGES),
            encode_idx(IMAGE_MAGIC, &[2, 1, 1], &[0, 0]),
        )
        .unwrap();
        std::fs::write(dir.path().join(TRAIN_LABELS), encode_idx(LABEL_MAGIC, &[3], &[0, 1, 2])).unwrap();
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 1);

        assert!(FashionMnist::new(dir.path()).load().is_err());
    }

    #[test]
    fn test_label_file_in_image_slot_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TRAIN_IMAGES), encode_idx(LABEL_MAGIC, &[2], &[0, 1])).unwrap();
        std::fs::write(dir.path().join(TRAIN_LABELS), encode_idx(LABEL_MAGIC, &[2], &[0, 1])).unwrap();
        write_split(dir.path(), TEST_IMAGES, TEST_LABELS, 1);

        assert!(FashionMnist::new(dir.path()).load().is_err());
    }
}
