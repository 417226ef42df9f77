//! Per-pixel and per-object detectors: snow, water, cloud, cloud shadow.
pub mod cloud;
pub mod shadow;
pub mod snow;
pub mod water;

pub use snow::{detect_absolute_snow, detect_snow};
pub use water::{detect_water, WaterMasks};
