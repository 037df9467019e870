use crate::capture::session::FrameSource;
use crate::common::{CameraConfig, FacesetError, Result};
use image::{DynamicImage, ImageBuffer, Luma};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// V4L2 camera. Grayscale IR cameras deliver GREY frames directly; everything
/// else is asked for MJPG and decoded through the image crate.
pub struct V4lCamera {
    device: Device,
    config: CameraConfig,
}

/// An open capture stream; borrows the camera for its lifetime.
pub struct CameraStream<'a> {
    stream: v4l::io::mmap::Stream<'a>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl V4lCamera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = config.device_index;
        let device = Device::new(index as usize)
            .map_err(|e| FacesetError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let mut fmt = device
            .format()
            .map_err(|e| FacesetError::Camera(format!("Failed to get format: {}", e)))?;

        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc.str().unwrap_or("") != "GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("could not set requested format, using device defaults: {}", e);
        }

        let actual = device
            .format()
            .map_err(|e| FacesetError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "camera {} open at {}x{} {}",
            index,
            actual.width,
            actual.height,
            actual.fourcc.str().unwrap_or("????")
        );
        if actual.width != config.width || actual.height != config.height {
            tracing::warn!(
                "camera resolution {}x{} differs from requested {}x{}",
                actual.width,
                actual.height,
                config.width,
                config.height
            );
        }

        Ok(Self {
            device,
            config: config.clone(),
        })
    }

    /// Starts streaming and burns the configured warmup frames so exposure
    /// settles before the first gated frame.
    pub fn start(&mut self) -> Result<CameraStream<'_>> {
        let fmt = self
            .device
            .format()
            .map_err(|e| FacesetError::Camera(format!("Failed to get format: {}", e)))?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(&mut self.device, Type::VideoCapture, 4)
            .map_err(|e| FacesetError::Camera(format!("Failed to create stream: {}", e)))?;

        for i in 0..self.config.warmup_frames {
            stream.next().map_err(|e| {
                FacesetError::Camera(format!("Failed to capture warmup frame {}: {}", i, e))
            })?;
            std::thread::sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms));
        }

        Ok(CameraStream {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

impl FrameSource for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| FacesetError::Camera(format!("Failed to capture: {}", e)))?;

        match self.fourcc.str().unwrap_or("") {
            "GREY" => {
                let image =
                    ImageBuffer::<Luma<u8>, _>::from_raw(self.width, self.height, buf.to_vec())
                        .ok_or_else(|| {
                            FacesetError::Camera("GREY frame shorter than expected".into())
                        })?;
                Ok(DynamicImage::ImageLuma8(image))
            }
            "MJPG" => image::load_from_memory(buf)
                .map_err(|e| FacesetError::Camera(format!("Failed to decode MJPG frame: {}", e))),
            other => Err(FacesetError::Camera(format!(
                "Unsupported pixel format: {}",
                other
            ))),
        }
    }
}
