//! Potential cloud pixels (PCP): the union of the basic spectral, whiteness,
//! haze, NIR/SWIR ratio, and (when available) normalised-cirrus tests.

use tracing::debug;

use crate::error::Result;
use crate::raster::{Mask, Raster, NO_DATA};
use crate::stats;

/// PCP mask plus the intermediates the probability stage reuses.
#[derive(Debug, Clone)]
pub struct PotentialCloudPixels {
    pub potential_pixels: Mask,
    /// Visible-band flatness; zero where any visible band saturated.
    pub whiteness: Raster<f32>,
    /// Haze-optimised transformation BLUE − 0.5·RED − 800.
    pub hot: Raster<f32>,
    /// Cirrus with its clear-sky background removed; present iff the scene
    /// carries a cirrus band.
    pub normalized_cirrus: Option<Raster<i16>>,
}

/// Spectral PCP screen (Zhu & Woodcock 2012 basic tests plus the Fmask 4
/// cirrus union).
#[allow(clippy::too_many_arguments)]
pub fn detect_potential_cloud_pixels(
    ndsi: &Raster<f32>,
    ndvi: &Raster<f32>,
    blue: &Raster<i16>,
    green: &Raster<i16>,
    red: &Raster<i16>,
    nir: &Raster<i16>,
    swir1: &Raster<i16>,
    swir2: &Raster<i16>,
    cirrus: Option<&Raster<i16>>,
    bt: Option<&Raster<i16>>,
    vis_saturation: &Mask,
    nodata_mask: &Mask,
    dem: Option<&Raster<i16>>,
) -> Result<PotentialCloudPixels> {
    let rows = ndsi.rows;
    let cols = ndsi.cols;

    // Basic test: not snow, not vegetation, bright in SWIR2, and (when BT
    // is available) warmer screens drop out at 27 degC.
    let mut potential = Mask::from_fn(rows, cols, |r, c| {
        ndsi.get(r, c) < 0.8 && ndvi.get(r, c) < 0.8 && swir2.get(r, c) > 300
    });
    if let Some(bt) = bt {
        for (p, &t) in potential.data.iter_mut().zip(bt.data.iter()) {
            *p = *p && t < 2700;
        }
    }

    // Whiteness: mean absolute deviation of the visible bands from their
    // mean, zeroed where any visible band saturated.
    let mut whiteness = Raster::filled(rows, cols, 0.0f32);
    for i in 0..whiteness.data.len() {
        if vis_saturation.data[i] {
            continue;
        }
        let b = blue.data[i] as f64;
        let g = green.data[i] as f64;
        let r = red.data[i] as f64;
        let mean = (b + g + r) / 3.0;
        whiteness.data[i] = (((b - mean).abs() + (g - mean).abs() + (r - mean).abs()) / mean) as f32;
    }
    for (p, (&w, &sat)) in potential
        .data
        .iter_mut()
        .zip(whiteness.data.iter().zip(vis_saturation.data.iter()))
    {
        *p = *p && (sat || w < 0.7);
    }

    // Haze test: positive HOT, or saturation masking the haze signal.
    let hot = blue.zip_map(red, |b, r| (b as f64 - 0.5 * r as f64 - 800.0) as f32);
    for (p, (&h, &sat)) in potential
        .data
        .iter_mut()
        .zip(hot.data.iter().zip(vis_saturation.data.iter()))
    {
        *p = *p && (h > 0.0 || sat);
    }

    // NIR/SWIR1 ratio.
    for i in 0..potential.data.len() {
        let ratio = nir.data[i] as f64 / swir1.data[i] as f64;
        potential.data[i] = potential.data[i] && ratio > 0.75;
    }

    // Thin cirrus joins as a union, overriding the tests above.
    let normalized_cirrus = match cirrus {
        Some(cirrus) => {
            let normalized = normalize_cirrus(cirrus, &potential, nodata_mask, dem)?;
            for (p, &nc) in potential.data.iter_mut().zip(normalized.data.iter()) {
                *p = *p || nc > 100;
            }
            Some(normalized)
        }
        None => None,
    };

    debug!(pixels = potential.count(), "potential cloud pixels");
    Ok(PotentialCloudPixels { potential_pixels: potential, whiteness, hot, normalized_cirrus })
}

/// Remove the clear-sky cirrus background: subtract the 2nd percentile of
/// cirrus over clear, valid pixels. With a usable DEM the background is
/// estimated per 100-m elevation bin (over the DEM 0.001–99.999 percentile
/// range), carrying the last non-empty bin's estimate forward; negatives
/// clip to zero.
fn normalize_cirrus(
    cirrus: &Raster<i16>,
    potential_pixels: &Mask,
    nodata_mask: &Mask,
    dem: Option<&Raster<i16>>,
) -> Result<Raster<i16>> {
    const PERCENTILE: f64 = 2.0;

    let valid_clear_sky = potential_pixels.not().and(&nodata_mask.not());
    let mut normalized = Raster::filled(cirrus.rows, cirrus.cols, 0i16);

    let dem_usable = dem
        .map(|d| d.data.iter().filter(|&&v| v != NO_DATA).count() >= 100)
        .unwrap_or(false);

    if !dem_usable {
        let mut clear_values = stats::masked_values(cirrus, &valid_clear_sky);
        // fully-clouded scenes have no background to estimate
        let background = if clear_values.is_empty() {
            0.0
        } else {
            stats::percentile(&mut clear_values, PERCENTILE)?
        };
        for i in 0..normalized.data.len() {
            if !nodata_mask.data[i] {
                normalized.data[i] = (cirrus.data[i] as f64 - background).max(0.0) as i16;
            }
        }
        return Ok(normalized);
    }

    let dem = dem.expect("dem_usable implies dem");
    let dem_valid = dem.map(|v| v != NO_DATA);
    let mut dem_values = stats::masked_values(dem, &dem_valid);
    let dem_start = stats::percentile(&mut dem_values, 0.001)?.floor();
    let dem_end = stats::percentile_sorted(&dem_values, 99.999).floor();

    const STEP: f64 = 100.0;
    let mut background = 0.0f64;
    let mut k = dem_start;
    while k < dem_end + STEP {
        let bin = Mask::from_fn(dem.rows, dem.cols, |r, c| {
            let v = dem.get(r, c);
            v != NO_DATA && (v as f64) >= k && (v as f64) < k + STEP
        });
        let bin_clear = bin.and(&valid_clear_sky);
        if bin_clear.count() > 0 {
            let mut values = stats::masked_values(cirrus, &bin_clear);
            background = stats::percentile(&mut values, PERCENTILE)?;
        }
        for i in 0..normalized.data.len() {
            if !nodata_mask.data[i] && bin.data[i] {
                normalized.data[i] = (cirrus.data[i] as f64 - background).max(0.0) as i16;
            }
        }
        k += STEP;
    }
    Ok(normalized)
}
