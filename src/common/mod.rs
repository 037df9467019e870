pub mod config;
pub mod error;

pub use config::{
    CameraConfig, CaptureConfig, Config, DatasetConfig, PreprocessConfig, QualityConfig,
};
pub use error::{FacesetError, Result};
