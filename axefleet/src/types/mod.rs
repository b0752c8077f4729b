//! Core data types shared across the engine.

mod device;
mod difficulty;

pub use device::{DeviceStatus, Shares, UNKNOWN};
pub use difficulty::{format_difficulty, parse_difficulty};
