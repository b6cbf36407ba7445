//! Still-image capture: correlation of metadata and image buffers, and
//! persistence of the result.

pub mod correlator;
pub mod queue;
pub mod save;

pub use correlator::{CaptureCorrelator, CaptureState, CombinedCaptureResult, IMAGE_CAPTURE_TIMEOUT};
pub use queue::{ImageQueue, QueueClosed, IMAGE_BUFFER_SIZE};
pub use save::{save_photo, save_result};
