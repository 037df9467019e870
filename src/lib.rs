// Core modules
pub mod capture;
pub mod common;
pub mod core;
pub mod storage;

// Re-export commonly used types
pub use capture::{CaptureSession, ControlInput, FrameSource, SessionEvent, SessionSummary};
pub use common::{Config, FacesetError, Result};
pub use self::core::{
    align_face, select_best, BatchResult, BoundingBox, DatasetStats, Detection, FaceDetector,
    FileOutcome, Landmarks, Point, Preprocessor, QualityGate, RejectReason, Verdict,
};
pub use storage::{PhotoMetadata, PhotoStore, Registry};
