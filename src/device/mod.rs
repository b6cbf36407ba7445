//! Camera device discovery and lifecycle

pub mod bridge;
pub mod manager;
pub mod selector;

pub use manager::{
    CameraEvent, DeviceHandle, DeviceSessionManager, SessionHandle, SessionState, TeardownHook,
};
pub use selector::select_camera;
