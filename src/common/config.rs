use crate::common::error::{FacesetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatasetConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("dataset")
}
fn default_processed_dir() -> PathBuf {
    PathBuf::from("dataset_preprocessed")
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            processed_dir: default_processed_dir(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_camera_width() -> u32 {
    1280
}
fn default_camera_height() -> u32 {
    720
}
fn default_warmup_frames() -> u32 {
    5
}
fn default_warmup_delay() -> u64 {
    50
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,
    #[serde(default = "default_min_brightness")]
    pub min_brightness: f32,
    #[serde(default = "default_max_brightness")]
    pub max_brightness: f32,
}

fn default_min_confidence() -> f32 {
    0.95
}
fn default_min_face_size() -> u32 {
    100
}
fn default_min_brightness() -> f32 {
    50.0
}
fn default_max_brightness() -> f32 {
    200.0
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_face_size: default_min_face_size(),
            min_brightness: default_min_brightness(),
            max_brightness: default_max_brightness(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_target_photos")]
    pub target_photos: u64,
    /// Run the detector only every Nth frame.
    #[serde(default = "default_detect_interval")]
    pub detect_interval: u32,
}

fn default_target_photos() -> u64 {
    40
}
fn default_detect_interval() -> u32 {
    3
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_photos: default_target_photos(),
            detect_interval: default_detect_interval(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PreprocessConfig {
    #[serde(default = "default_target_size")]
    pub target_width: u32,
    #[serde(default = "default_target_size")]
    pub target_height: u32,
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,
    #[serde(default = "default_clahe_clip_limit")]
    pub clahe_clip_limit: f32,
    #[serde(default = "default_clahe_grid")]
    pub clahe_grid: u32,
    /// Crop and eye-align faces when a metadata sidecar is present.
    #[serde(default = "default_true")]
    pub align_faces: bool,
    /// Scale pixel values to [0,1] floats before handing frames to the
    /// embedding function. Batch output on disk stays 8-bit either way.
    #[serde(default)]
    pub normalize_pixels: bool,
}

fn default_target_size() -> u32 {
    160
}
fn default_blur_threshold() -> f64 {
    100.0
}
fn default_clahe_clip_limit() -> f32 {
    2.0
}
fn default_clahe_grid() -> u32 {
    8
}
fn default_true() -> bool {
    true
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_width: default_target_size(),
            target_height: default_target_size(),
            blur_threshold: default_blur_threshold(),
            clahe_clip_limit: default_clahe_clip_limit(),
            clahe_grid: default_clahe_grid(),
            align_faces: true,
            normalize_pixels: false,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => {
                let default_path = Path::new("configs/faceset.toml");
                if default_path.exists() {
                    Self::load_from_path(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FacesetError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::debug!("loading config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| FacesetError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FacesetError::Config(format!(
                "Camera width must be between 1 and 4096, got {}",
                self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FacesetError::Config(format!(
                "Camera height must be between 1 and 4096, got {}",
                self.camera.height
            )));
        }

        if !(0.0..=1.0).contains(&self.quality.min_confidence) {
            return Err(FacesetError::Config(format!(
                "Minimum confidence must be between 0.0 and 1.0, got {}",
                self.quality.min_confidence
            )));
        }
        if self.quality.min_brightness >= self.quality.max_brightness {
            return Err(FacesetError::Config(format!(
                "Brightness window is empty: [{}, {}]",
                self.quality.min_brightness, self.quality.max_brightness
            )));
        }

        if self.capture.detect_interval == 0 {
            return Err(FacesetError::Config(
                "Detection interval must be at least 1".into(),
            ));
        }
        if self.capture.target_photos == 0 {
            return Err(FacesetError::Config(
                "Target photo count must be at least 1".into(),
            ));
        }

        if self.preprocess.target_width == 0 || self.preprocess.target_height == 0 {
            return Err(FacesetError::Config(
                "Preprocess target size must be non-zero".into(),
            ));
        }
        if self.preprocess.clahe_grid == 0 {
            return Err(FacesetError::Config(
                "CLAHE tile grid must be at least 1".into(),
            ));
        }
        if self.preprocess.clahe_clip_limit <= 0.0 {
            return Err(FacesetError::Config(format!(
                "CLAHE clip limit must be positive, got {}",
                self.preprocess.clahe_clip_limit
            )));
        }

        Ok(())
    }
}
