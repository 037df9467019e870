pub mod align;
pub mod detection;
pub mod preprocess;
pub mod quality;

pub use align::align_face;
pub use detection::{select_best, BoundingBox, Detection, FaceDetector, Landmarks, Point};
pub use preprocess::{BatchResult, BlurEntry, DatasetStats, FileOutcome, Preprocessor};
pub use quality::{QualityGate, RejectReason, Verdict};
