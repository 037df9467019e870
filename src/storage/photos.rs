use crate::common::Result;
use crate::core::detection::{BoundingBox, Detection, Landmarks};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-photo capture record, written as a JSON sidecar next to the image.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub timestamp: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    /// Source frame size as (width, height).
    pub resolution: (u32, u32),
}

impl PhotoMetadata {
    /// Sidecar path for an image: `<stem>_metadata.json` in the same
    /// directory.
    pub fn sidecar_path(image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("photo");
        image_path.with_file_name(format!("{}_metadata.json", stem))
    }

    /// Reads the sidecar for an image if one exists. A missing or unparsable
    /// sidecar yields `None`; preprocessing then simply skips alignment.
    pub fn load_sidecar(image_path: &Path) -> Option<PhotoMetadata> {
        let path = Self::sidecar_path(image_path);
        let data = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!("ignoring corrupt sidecar {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Writes accepted captures into one directory per subject: an image file
/// plus its metadata sidecar sharing a base filename.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join(subject)
    }

    /// Persists one accepted capture. The image goes to a temporary file and
    /// is renamed into place; the sidecar is written only after the image is
    /// confirmed on disk, so an interrupted save never leaves a metadata
    /// record without its photo.
    pub fn save(
        &self,
        subject: &str,
        sequence: u64,
        frame: &DynamicImage,
        detection: &Detection,
    ) -> Result<PathBuf> {
        let dir = self.subject_dir(subject);
        fs::create_dir_all(&dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let filename = format!("{}_{:03}_{}.jpg", subject, sequence, timestamp);
        let image_path = dir.join(&filename);

        let tmp_path = dir.join(format!(".{}.tmp", filename));
        frame.to_rgb8().save_with_format(&tmp_path, ImageFormat::Jpeg)?;
        fs::rename(&tmp_path, &image_path)?;

        let metadata = PhotoMetadata {
            timestamp,
            confidence: detection.confidence,
            bbox: detection.bbox,
            landmarks: detection.landmarks,
            resolution: (frame.width(), frame.height()),
        };
        let json = serde_json::to_string_pretty(&metadata).map_err(|e| {
            crate::common::FacesetError::Storage(format!("failed to serialize metadata: {}", e))
        })?;
        fs::write(PhotoMetadata::sidecar_path(&image_path), json)?;

        tracing::debug!("saved capture {}", image_path.display());
        Ok(image_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detection::Point;
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    fn detection() -> Detection {
        Detection {
            bbox: BoundingBox::new(10, 20, 150, 150),
            confidence: 0.97,
            landmarks: Landmarks::from_eyes(Point::new(50.0, 70.0), Point::new(120.0, 70.0)),
        }
    }

    #[test]
    fn sidecar_path_shares_the_base_name() {
        let path = Path::new("dataset/STU001/STU001_001_x.jpg");
        assert_eq!(
            PhotoMetadata::sidecar_path(path),
            Path::new("dataset/STU001/STU001_001_x_metadata.json")
        );
    }

    #[test]
    fn save_writes_image_and_sidecar() {
        let dir = tempdir().unwrap();
        let store = PhotoStore::new(dir.path());
        let frame = DynamicImage::ImageLuma8(GrayImage::from_pixel(640, 480, Luma([120])));

        let image_path = store.save("STU001", 1, &frame, &detection()).unwrap();

        assert!(image_path.exists());
        assert!(image_path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("STU001_001_"));

        let metadata = PhotoMetadata::load_sidecar(&image_path).unwrap();
        assert_eq!(metadata.confidence, 0.97);
        assert_eq!(metadata.bbox, BoundingBox::new(10, 20, 150, 150));
        assert_eq!(metadata.resolution, (640, 480));

        // No stray temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(store.subject_dir("STU001"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().unwrap().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_sidecar_is_none() {
        assert!(PhotoMetadata::load_sidecar(Path::new("nope/missing.jpg")).is_none());
    }
}
