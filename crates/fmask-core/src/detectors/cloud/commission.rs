//! Commission removal: erode-then-dilate cleanup of the cloud mask against
//! the false-positive candidate layer, with the Sentinel-2 CDI gate for
//! small objects.

use tracing::debug;

use crate::morphology::{dilate_disk, erode_disk, label, remove_small_objects};
use crate::raster::{Mask, Raster};

/// Large cloud objects (in pixels) bypass the CDI confidence gate.
const LARGE_OBJECT_AREA: usize = 10_000;

/// Erode the cloud mask by a disk, drop eroded-away pixels that sit on
/// commission candidates, then grow back with a double-radius dilation
/// restricted to components that kept a seed. Cloud over water is always
/// kept. With CDI, small objects additionally need one confident
/// (CDI < −0.5) pixel, and fragments under 3 px are dropped.
pub fn erode_commissons(
    cloud: &Mask,
    potential_false_positives: &Mask,
    water: &Mask,
    cdi: Option<&Raster<f32>>,
    erode_pixels: usize,
) -> Mask {
    let eroded = erode_disk(cloud, erode_pixels);

    // Pixels the erosion removed that look like commission sources.
    let mut seeds = cloud.clone();
    for i in 0..seeds.data.len() {
        if !eroded.data[i] && potential_false_positives.data[i] {
            seeds.data[i] = false;
        }
    }

    let grown = dilate_disk(&seeds, 2 * erode_pixels);

    // Keep only original components that still own at least one seed pixel.
    let (labels, props) = label(cloud);
    let mut keep = vec![false; props.len() + 1];
    for i in 0..labels.data.len() {
        if seeds.data[i] {
            keep[labels.data[i] as usize] = true;
        }
    }
    let mut cleaned = Mask::zeros(cloud.rows, cloud.cols);
    for i in 0..cleaned.data.len() {
        let remaining = labels.data[i] != 0 && keep[labels.data[i] as usize];
        cleaned.data[i] = (grown.data[i] && remaining) || (water.data[i] && cloud.data[i]);
    }

    let cdi = match cdi {
        Some(cdi) => cdi,
        None => {
            debug!(pixels = cleaned.count(), "cloud after commission removal");
            return cleaned;
        }
    };

    // Sentinel-2: small objects must contain a confidently parallactic pixel.
    let (labels, props) = label(&cleaned);
    let mut confident = vec![false; props.len() + 1];
    for i in 0..labels.data.len() {
        if labels.data[i] != 0 && cdi.data[i] < -0.5 {
            confident[labels.data[i] as usize] = true;
        }
    }
    let mut gated = cleaned;
    for prop in &props {
        if prop.area > LARGE_OBJECT_AREA || confident[prop.label as usize] {
            continue;
        }
        for i in 0..gated.data.len() {
            if labels.data[i] == prop.label {
                gated.data[i] = false;
            }
        }
    }
    let result = remove_small_objects(&gated, 3);
    debug!(pixels = result.count(), "cloud after commission removal");
    result
}
