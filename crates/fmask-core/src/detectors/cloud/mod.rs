//! Cloud detection: potential pixels, probability surfaces, commission
//! candidates, and morphological cleanup.
pub mod commission;
pub mod false_positives;
pub mod potential_clouds;
pub mod potential_pixels;

pub use commission::erode_commissons;
pub use false_positives::detect_false_positive_pixels;
pub use potential_clouds::{detect_potential_clouds, PotentialClouds};
pub use potential_pixels::{detect_potential_cloud_pixels, PotentialCloudPixels};
