use crate::common::{CaptureConfig, Result};
use crate::core::detection::{select_best, FaceDetector};
use crate::core::quality::{QualityGate, Verdict};
use crate::storage::{PhotoStore, Registry};
use image::DynamicImage;

/// Supplies frames to a capture session. The v4l camera implements this; in
/// tests a canned source does.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<DynamicImage>;
}

/// User-driven control signal, polled once per loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Continue,
    Stop,
}

pub trait ControlInput {
    fn poll(&mut self) -> Result<SessionEvent>;
}

/// Control input that never stops; the session runs until the target count
/// is reached.
pub struct NoControls;

impl ControlInput for NoControls {
    fn poll(&mut self) -> Result<SessionEvent> {
        Ok(SessionEvent::Continue)
    }
}

/// What a finished (or stopped) session did.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub subject: String,
    /// Photos accepted during this session.
    pub captured: u64,
    /// Registry count for the subject after the session, including photos
    /// from earlier sessions.
    pub total_for_subject: u64,
    pub frames_read: u64,
    pub detections_attempted: u64,
    pub last_reject: Option<String>,
}

/// Orchestrates one interactive capture run for a subject: pull a frame,
/// detect on a sub-sampled schedule, gate, and persist accepted captures.
///
/// Single-threaded and synchronous; one session per subject at a time. The
/// only error allowed to abort the loop on an accepted frame is a storage
/// failure, because a photo on disk without a durably recorded count would
/// break the registry invariant.
pub struct CaptureSession<'a> {
    gate: QualityGate,
    registry: &'a mut Registry,
    store: &'a PhotoStore,
    config: CaptureConfig,
}

impl<'a> CaptureSession<'a> {
    pub fn new(
        gate: QualityGate,
        registry: &'a mut Registry,
        store: &'a PhotoStore,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            gate,
            registry,
            store,
            config: config.clone(),
        }
    }

    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn FaceDetector,
        controls: &mut dyn ControlInput,
        subject: &str,
        target_count: u64,
    ) -> Result<SessionSummary> {
        let starting_count = self.registry.count(subject);
        let mut count = starting_count;
        let mut frames_read = 0u64;
        let mut detections_attempted = 0u64;
        let mut last_reject = None;

        tracing::info!(
            subject,
            starting_count,
            target_count,
            "starting capture session"
        );

        while count < target_count {
            // Stop lands on an iteration boundary, so a photo write is never
            // left half-done.
            if controls.poll()? == SessionEvent::Stop {
                tracing::info!(subject, "capture stopped by user");
                break;
            }

            let frame = source.next_frame()?;
            frames_read += 1;

            // Detection is expensive; run it only every Nth frame.
            if (frames_read - 1) % self.config.detect_interval as u64 != 0 {
                continue;
            }
            detections_attempted += 1;

            let detections = match detector.detect(&frame) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("detector failed on frame {}: {}", frames_read, e);
                    continue;
                }
            };

            let best = select_best(&detections);
            match self.gate.evaluate(best, &frame) {
                Verdict::Accept => {
                    // Accept implies a detection was present.
                    let Some(detection) = best else { continue };

                    let path = self.store.save(subject, count + 1, &frame, detection)?;
                    count = self.registry.record_accept(subject)?;

                    tracing::info!(
                        subject,
                        count,
                        target_count,
                        path = %path.display(),
                        "photo accepted"
                    );
                }
                Verdict::Reject(reason) => {
                    tracing::debug!(subject, %reason, "frame rejected");
                    last_reject = Some(reason.to_string());
                }
            }
        }

        Ok(SessionSummary {
            subject: subject.to_string(),
            captured: count - starting_count,
            total_for_subject: count,
            frames_read,
            detections_attempted,
            last_reject,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CaptureConfig, QualityConfig};
    use crate::core::detection::{BoundingBox, Detection, Landmarks, Point};
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    struct FlatFrames(u8);

    impl FrameSource for FlatFrames {
        fn next_frame(&mut self) -> Result<DynamicImage> {
            Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                640,
                480,
                Luma([self.0]),
            )))
        }
    }

    struct CannedDetector {
        detections: Vec<Detection>,
    }

    impl FaceDetector for CannedDetector {
        fn detect(&mut self, _frame: &DynamicImage) -> Result<Vec<Detection>> {
            Ok(self.detections.clone())
        }
    }

    fn good_detection() -> Detection {
        Detection {
            bbox: BoundingBox::new(100, 100, 200, 200),
            confidence: 0.99,
            landmarks: Landmarks::from_eyes(Point::new(150.0, 170.0), Point::new(250.0, 170.0)),
        }
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            target_photos: 40,
            detect_interval: 1,
        }
    }

    #[test]
    fn captures_until_target_and_advances_registry() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        let store = PhotoStore::new(dir.path());
        let gate = QualityGate::new(&QualityConfig::default());

        let mut session = CaptureSession::new(gate, &mut registry, &store, &config());
        let summary = session
            .run(
                &mut FlatFrames(120),
                &mut CannedDetector {
                    detections: vec![good_detection()],
                },
                &mut NoControls,
                "STU001",
                3,
            )
            .unwrap();

        assert_eq!(summary.captured, 3);
        assert_eq!(summary.total_for_subject, 3);
        assert_eq!(registry.count("STU001"), 3);

        let photos: Vec<_> = std::fs::read_dir(dir.path().join("STU001"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_str().unwrap().to_string())
            .collect();
        assert_eq!(photos.iter().filter(|n| n.ends_with(".jpg")).count(), 3);
        assert_eq!(
            photos
                .iter()
                .filter(|n| n.ends_with("_metadata.json"))
                .count(),
            3
        );
    }

    #[test]
    fn rejected_frames_persist_nothing() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        let store = PhotoStore::new(dir.path());
        let gate = QualityGate::new(&QualityConfig::default());

        struct StopAfter(u64);
        impl ControlInput for StopAfter {
            fn poll(&mut self) -> Result<SessionEvent> {
                if self.0 == 0 {
                    return Ok(SessionEvent::Stop);
                }
                self.0 -= 1;
                Ok(SessionEvent::Continue)
            }
        }

        let mut low_conf = good_detection();
        low_conf.confidence = 0.5;

        let mut session = CaptureSession::new(gate, &mut registry, &store, &config());
        let summary = session
            .run(
                &mut FlatFrames(120),
                &mut CannedDetector {
                    detections: vec![low_conf],
                },
                &mut StopAfter(10),
                "STU001",
                3,
            )
            .unwrap();

        assert_eq!(summary.captured, 0);
        assert_eq!(summary.last_reject.as_deref(), Some("low confidence: 0.50"));
        assert_eq!(registry.count("STU001"), 0);
        assert!(!dir.path().join("STU001").exists());
    }

    #[test]
    fn detect_interval_subsamples_frames() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        let store = PhotoStore::new(dir.path());
        let gate = QualityGate::new(&QualityConfig::default());

        let cfg = CaptureConfig {
            target_photos: 40,
            detect_interval: 3,
        };
        let mut session = CaptureSession::new(gate, &mut registry, &store, &cfg);
        let summary = session
            .run(
                &mut FlatFrames(120),
                &mut CannedDetector { detections: vec![] },
                &mut StopAfterFrames(9),
                "STU001",
                5,
            )
            .unwrap();

        assert_eq!(summary.frames_read, 9);
        assert_eq!(summary.detections_attempted, 3);
        assert_eq!(summary.last_reject.as_deref(), Some("no face"));
    }

    struct StopAfterFrames(u64);
    impl ControlInput for StopAfterFrames {
        fn poll(&mut self) -> Result<SessionEvent> {
            if self.0 == 0 {
                return Ok(SessionEvent::Stop);
            }
            self.0 -= 1;
            Ok(SessionEvent::Continue)
        }
    }

    #[test]
    fn registry_write_failure_aborts_the_session() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        let store = PhotoStore::new(dir.path());
        let gate = QualityGate::new(&QualityConfig::default());

        // A directory squatting on the temp path makes the registry write
        // fail; a photo accepted without a durably recorded count must abort
        // the session instead of carrying on.
        std::fs::create_dir(dir.path().join("registry.json.tmp")).unwrap();

        struct CountedFlat {
            reads: u64,
        }
        impl FrameSource for CountedFlat {
            fn next_frame(&mut self) -> Result<DynamicImage> {
                self.reads += 1;
                Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                    640,
                    480,
                    Luma([120]),
                )))
            }
        }

        let mut source = CountedFlat { reads: 0 };
        let mut session = CaptureSession::new(gate, &mut registry, &store, &config());
        let result = session.run(
            &mut source,
            &mut CannedDetector {
                detections: vec![good_detection()],
            },
            &mut NoControls,
            "STU001",
            3,
        );

        assert!(result.is_err());
        // The failing accept consumed exactly one frame; no retry loop.
        assert_eq!(source.reads, 1);
        // Nothing was durably recorded.
        assert_eq!(Registry::load(dir.path()).unwrap().count("STU001"), 0);
    }

    #[test]
    fn resumes_from_existing_registry_count() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        registry.record_accept("STU001").unwrap();
        registry.record_accept("STU001").unwrap();
        let store = PhotoStore::new(dir.path());
        let gate = QualityGate::new(&QualityConfig::default());

        let mut session = CaptureSession::new(gate, &mut registry, &store, &config());
        let summary = session
            .run(
                &mut FlatFrames(120),
                &mut CannedDetector {
                    detections: vec![good_detection()],
                },
                &mut NoControls,
                "STU001",
                4,
            )
            .unwrap();

        assert_eq!(summary.captured, 2);
        assert_eq!(summary.total_for_subject, 4);
    }

    #[test]
    fn target_already_met_reads_no_frames() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::load(dir.path()).unwrap();
        for _ in 0..3 {
            registry.record_accept("STU001").unwrap();
        }
        let store = PhotoStore::new(dir.path());
        let gate = QualityGate::new(&QualityConfig::default());

        let mut session = CaptureSession::new(gate, &mut registry, &store, &config());
        let summary = session
            .run(
                &mut FlatFrames(120),
                &mut CannedDetector { detections: vec![] },
                &mut NoControls,
                "STU001",
                3,
            )
            .unwrap();

        assert_eq!(summary.frames_read, 0);
        assert_eq!(summary.captured, 0);
    }
}
