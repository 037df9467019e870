pub mod camera;
pub mod controls;
pub mod session;

pub use camera::{CameraStream, V4lCamera};
pub use controls::KeyboardControls;
pub use session::{
    CaptureSession, ControlInput, FrameSource, NoControls, SessionEvent, SessionSummary,
};
