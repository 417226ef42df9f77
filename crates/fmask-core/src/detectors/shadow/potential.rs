//! Potential shadow pixels from NIR/SWIR1 flood filling.

use tracing::debug;

use crate::error::Result;
use crate::morphology::{imfill, remove_small_objects};
use crate::raster::{Mask, Raster};
use crate::stats;

/// Sentinel painted into the potential-shadow raster over nodata; treated as
/// non-shadow by the matcher.
pub const SHADOW_NO_DATA: u8 = 255;

/// Flood-fill shadow probability: fill nodata with the clear-land low
/// percentile, run morphological reconstruction on NIR and SWIR1, and take
/// the smaller fill difference as the shadow signal.
///
/// The threshold of 500 is deliberately conservative: the original Fmask
/// uses 200, but reconstruction-implementation differences overdetect at
/// that level.
#[allow(clippy::too_many_arguments)]
pub fn detect_potential_shadow(
    nir: &Raster<i16>,
    swir1: &Raster<i16>,
    clear_land: &Mask,
    nodata_mask: &Mask,
    slope: Option<&Raster<f32>>,
    aspect: Option<&Raster<f32>>,
    sun_elevation: f64,
    sun_azimuth: f64,
    shadow_probability_threshold: f32,
) -> Result<Raster<u8>> {
    const PERCENT_LOW: f64 = 17.5;

    let (nir_corrected, swir1_corrected) = topo_corrected(
        nir,
        swir1,
        slope,
        aspect,
        90.0 - sun_elevation,
        sun_azimuth,
    );

    let mut nir_clear = stats::masked_values(nir, clear_land);
    let backg_nir = stats::percentile(&mut nir_clear, PERCENT_LOW)? as f32;
    let mut swir1_clear = stats::masked_values(swir1, clear_land);
    let backg_swir1 = stats::percentile(&mut swir1_clear, PERCENT_LOW)? as f32;

    let diff_nir = fill_difference(&nir_corrected, nodata_mask, backg_nir);
    let diff_swir1 = fill_difference(&swir1_corrected, nodata_mask, backg_swir1);

    let shadow_probability = diff_nir.zip_map(&diff_swir1, f32::min);

    let mask = Mask::from_fn(nir.rows, nir.cols, |r, c| {
        shadow_probability.get(r, c) > shadow_probability_threshold
    });
    let mask = remove_small_objects(&mask, 3);
    debug!(pixels = mask.count(), "potential shadow pixels");

    Ok(Raster::from_fn(nir.rows, nir.cols, |r, c| {
        if nodata_mask.get(r, c) {
            SHADOW_NO_DATA
        } else {
            mask.get(r, c) as u8
        }
    }))
}

/// Difference between the flood-filled band and the band itself, with
/// nodata pixels held at the clear-land background level.
fn fill_difference(band: &Raster<f32>, nodata_mask: &Mask, background: f32) -> Raster<f32> {
    let prepared = Raster::from_fn(band.rows, band.cols, |r, c| {
        let v = band.get(r, c);
        if nodata_mask.get(r, c) || v.is_nan() {
            background
        } else {
            v
        }
    });
    let filled = imfill(&prepared);
    filled.zip_map(&prepared, |f, p| f - p)
}

/// Topographic illumination correction hook for NIR/SWIR1. Identity for
/// now; the interface carries the solar geometry a future correction needs.
fn topo_corrected(
    nir: &Raster<i16>,
    swir1: &Raster<i16>,
    _slope: Option<&Raster<f32>>,
    _aspect: Option<&Raster<f32>>,
    _sun_zenith_deg: f64,
    _sun_azimuth_deg: f64,
) -> (Raster<f32>, Raster<f32>) {
    (nir.map(|v| v as f32), swir1.map(|v| v as f32))
}
