//! Testing utilities for CrabCapture
//!
//! A scripted camera backend and synthetic capture data so the whole
//! capture pipeline runs offline, without camera hardware.

pub mod fixtures;
pub mod simulated;
pub mod synthetic_data;

pub use simulated::{
    ConfigureBehavior, FixedOrientation, MemoryStorage, OpenBehavior, SimulatedDevice,
    SimulatedEncoder, SimulatedImageReader, SimulatedProvider, SimulatedSession,
    SimulationStats, StaticDisplay, StillScript,
};
pub use synthetic_data::{frame_timestamp, synthetic_jpeg};
