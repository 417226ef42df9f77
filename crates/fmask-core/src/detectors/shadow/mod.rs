//! Cloud-shadow detection: flood-fill shadow probability and the geometric
//! cloud-object matcher.
pub mod matching;
pub mod potential;

pub use matching::{match_cloud_shadows, shadow_displacement, MatchingInputs};
pub use potential::{detect_potential_shadow, SHADOW_NO_DATA};
