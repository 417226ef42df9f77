//! Geometric matching of cloud objects to their shadows along the solar ray.
//!
//! Each 8-connected cloud object is projected over a range of plausible base
//! heights; the projected footprint is scored against the potential-shadow
//! layer and the best-scoring displacements are painted as matched shadow.

use tracing::debug;

use crate::morphology::{label, RegionProps};
use crate::raster::{Mask, Raster, NO_DATA};
use crate::stats;

/// Matched displacements closer to the cloud than this (pixels) are rejected
/// as the cloud's own boundary.
const NEIGHBOUR_TOLERANCE: f64 = 4.25;

/// A sample is accepted when its similarity reaches this fraction of the
/// running maximum.
const SIMILARITY_MATCHED_THRESHOLD: f64 = 0.95;

/// Below this clear-pixel count the scene is too cloudy to match shadows.
const CLOUD_PIXELS_LIMIT: usize = 40_000;

/// Default cloud-base height interval, metres.
const MIN_CLOUD_HEIGHT: f64 = 200.0;
const MAX_CLOUD_HEIGHT: f64 = 12_000.0;

/// Dry adiabatic lapse rate, °C per km.
const DRY_ADIABATIC_LAPSE_RATE: f64 = 9.8;

/// Displacement magnitude ceiling so low-sun geometry stays within i32.
const MAX_DISPLACEMENT_PX: f64 = i32::MAX as f64;

/// Pixel displacement of a shadow cast from height `height_px` (already in
/// pixel units) under the given solar geometry. Truncated toward zero after
/// clamping, so a sun elevation near zero cannot overflow.
pub fn shadow_displacement(height_px: f64, sun_elevation: f64, sun_azimuth: f64) -> (i64, i64) {
    let run = height_px / sun_elevation.to_radians().tan();
    let run = run.clamp(-MAX_DISPLACEMENT_PX, MAX_DISPLACEMENT_PX);
    let dx = (-run * sun_azimuth.to_radians().sin()).clamp(-MAX_DISPLACEMENT_PX, MAX_DISPLACEMENT_PX);
    let dy = (run * sun_azimuth.to_radians().cos()).clamp(-MAX_DISPLACEMENT_PX, MAX_DISPLACEMENT_PX);
    (dx.trunc() as i64, dy.trunc() as i64)
}

/// Scene-level inputs of the shadow matcher.
pub struct MatchingInputs<'a> {
    pub cloud: &'a Mask,
    pub sum_clear_pixels: usize,
    pub all_water: &'a Mask,
    /// Potential-shadow raster: 1 shadow, 0 clear, 255 nodata.
    pub potential_shadow: &'a Raster<u8>,
    pub nodata_mask: &'a Mask,
    /// Brightness temperature (hundredths of °C), DEM-normalised.
    pub bt: Option<&'a Raster<i16>>,
    pub dem: Option<&'a Raster<i16>>,
    pub sun_elevation: f64,
    pub sun_azimuth: f64,
    pub out_resolution: u32,
    pub temp_test_low: f64,
    pub temp_test_high: f64,
    pub low_percent: f64,
    pub high_percent: f64,
}

/// Match every cloud object to its shadow. Returns the matched-shadow mask.
pub fn match_cloud_shadows(inputs: &MatchingInputs<'_>) -> crate::error::Result<Mask> {
    let cloud = inputs.cloud;
    let rows = cloud.rows;
    let cols = cloud.cols;

    let shadow_mask = inputs.potential_shadow.map(|v| v == 1);
    let mut matched = Mask::zeros(rows, cols);

    let valid_pixels = inputs.nodata_mask.not().count();
    if valid_pixels == 0 {
        return Ok(matched);
    }

    let cloud_potential = cloud.and(&inputs.nodata_mask.not());
    let cloud_fraction = cloud_potential.count() as f64 / valid_pixels as f64;

    // Too cloudy to match: everything that is not potential shadow becomes
    // shadow, and the cloud layer overpaints it during composition.
    if inputs.sum_clear_pixels <= CLOUD_PIXELS_LIMIT || cloud_fraction >= 0.90 {
        debug!("skipping shadow matching due to high cloud cover");
        return Ok(shadow_mask.not());
    }

    // Scene base elevation for cloud-base estimates.
    let mut base_dem_height = 0.0f64;
    if let Some(dem) = inputs.dem {
        let valid = dem.zip_map(inputs.nodata_mask, |d, nd| d != NO_DATA && !nd);
        if valid.count() > 0 {
            let mut values = stats::masked_values(dem, &valid);
            base_dem_height = stats::percentile(&mut values, 0.001)?;
        }
    }

    let (labels, props) = label(&cloud_potential);
    if props.is_empty() {
        return Ok(matched);
    }
    debug!(clouds = props.len(), "matching cloud objects to shadows");

    for prop in &props {
        match_one_cloud(
            inputs,
            &labels,
            prop,
            &shadow_mask,
            base_dem_height,
            &mut matched,
        )?;
    }

    debug!(pixels = matched.count(), "matched cloud shadow");
    Ok(matched)
}

fn match_one_cloud(
    inputs: &MatchingInputs<'_>,
    labels: &Raster<u32>,
    prop: &RegionProps,
    shadow_mask: &Mask,
    base_dem_height: f64,
    matched: &mut Mask,
) -> crate::error::Result<()> {
    let rows = labels.rows as i64;
    let cols = labels.cols as i64;
    let in_template =
        |r: i64, c: i64| labels.get_checked(r, c).map(|l| l == prop.label).unwrap_or(false);

    // Cloud-base height interval, per object.
    let mut min_height = MIN_CLOUD_HEIGHT;
    let mut max_height = MAX_CLOUD_HEIGHT;

    // Raise the interval onto the terrain under the cloud.
    if let Some(dem) = inputs.dem {
        let mut values: Vec<f64> = Vec::new();
        for r in prop.min_row..prop.max_row {
            for c in prop.min_col..prop.max_col {
                let v = dem.get(r, c);
                if v != NO_DATA && in_template(r as i64, c as i64) {
                    values.push(v as f64);
                }
            }
        }
        if !values.is_empty() {
            let base = stats::percentile(&mut values, 100.0 * inputs.high_percent)? - base_dem_height;
            min_height += base;
            max_height += base;
        }
    }

    // Tighten with the object's base temperature: interior pixels of large
    // clouds are colder than the base, so the base estimate moves up the BT
    // distribution with the effective radius.
    if let Some(bt) = inputs.bt {
        let mut values: Vec<f64> = Vec::new();
        for r in prop.min_row..prop.max_row {
            for c in prop.min_col..prop.max_col {
                let v = bt.get(r, c);
                if v != NO_DATA && in_template(r as i64, c as i64) {
                    values.push(v as f64);
                }
            }
        }
        if !values.is_empty() {
            let radius = (prop.area as f64 / (2.0 * std::f64::consts::PI)).sqrt();
            let base_temperature = if radius >= 8.0 {
                let pct = 100.0 * (radius - 8.0) * (radius - 8.0) / (radius * radius);
                stats::percentile(&mut values, pct)?
            } else {
                values.iter().cloned().fold(f64::INFINITY, f64::min)
            };
            min_height = min_height.max(
                10.0 * (inputs.temp_test_low - 400.0 - base_temperature) / DRY_ADIABATIC_LAPSE_RATE,
            );
            max_height = max_height.min(10.0 * (inputs.temp_test_high + 400.0 - base_temperature));
        }
    }

    let res = inputs.out_resolution as f64;
    let (dx1, dy1) = shadow_displacement(min_height / res, inputs.sun_elevation, inputs.sun_azimuth);
    let (dx2, dy2) = shadow_displacement(max_height / res, inputs.sun_elevation, inputs.sun_azimuth);

    let num_steps = ((dx2 - dx1).abs().max((dy2 - dy1).abs())).max(1);
    let x_step = (dx2 - dx1) as f64 / num_steps as f64;
    let y_step = (dy2 - dy1) as f64 / num_steps as f64;
    let displacement_at = |i: i64| {
        (
            (dx1 as f64 + i as f64 * x_step).trunc() as i64,
            (dy1 as f64 + i as f64 * y_step).trunc() as i64,
        )
    };

    // Similarity of the (self-overlap-trimmed) projected footprint against
    // the potential-shadow layer, per ray sample.
    let mut samples: Vec<(i64, f64)> = Vec::new();
    for i in 0..num_steps {
        let (dx, dy) = displacement_at(i);

        // Footprint entirely off the grid (common under grazing sun).
        if prop.min_row as i64 + dy >= rows
            || prop.max_row as i64 + dy <= 0
            || prop.min_col as i64 + dx >= cols
            || prop.max_col as i64 + dx <= 0
        {
            continue;
        }

        // Skip samples whose candidate shadow lies entirely on water.
        let mut shadow_px = 0usize;
        let mut shadow_water_px = 0usize;
        for r in prop.min_row..prop.max_row {
            for c in prop.min_col..prop.max_col {
                let gr = r as i64 + dy;
                let gc = c as i64 + dx;
                if gr < 0 || gc < 0 || gr >= rows || gc >= cols {
                    continue;
                }
                if shadow_mask.get(gr as usize, gc as usize) {
                    shadow_px += 1;
                    if inputs.all_water.get(gr as usize, gc as usize) {
                        shadow_water_px += 1;
                    }
                }
            }
        }
        if shadow_px == shadow_water_px {
            continue;
        }

        let mut trimmed = 0usize;
        let mut hits = 0usize;
        for r in prop.min_row..prop.max_row {
            for c in prop.min_col..prop.max_col {
                if !in_template(r as i64, c as i64) {
                    continue;
                }
                // Positions shadowing the cloud itself cannot score.
                let local_r = r as i64 + dy;
                let local_c = c as i64 + dx;
                let self_overlap = local_r >= prop.min_row as i64
                    && local_r < prop.max_row as i64
                    && local_c >= prop.min_col as i64
                    && local_c < prop.max_col as i64
                    && in_template(local_r, local_c);
                if self_overlap {
                    continue;
                }
                trimmed += 1;
                if local_r >= 0
                    && local_c >= 0
                    && local_r < rows
                    && local_c < cols
                    && shadow_mask.get(local_r as usize, local_c as usize)
                {
                    hits += 1;
                }
            }
        }
        if trimmed == 0 || hits == 0 {
            continue;
        }
        samples.push((i, hits as f64 / trimmed as f64));
    }

    if samples.is_empty() {
        return Ok(());
    }

    // Scan the ray in order, tracking the running maximum. On descent, stop
    // at the first sample below 95 % of the maximum, provided the maximum is
    // convincing (> 0.3) and not right at the cloud boundary.
    let mut similarity_max = 0.0f64;
    let mut ind_max = 0usize;
    let mut stop = samples.len() - 1;
    for (ind, &(_, sim)) in samples.iter().enumerate() {
        if similarity_max <= sim {
            similarity_max = sim;
            ind_max = ind;
            continue;
        }
        if sim > SIMILARITY_MATCHED_THRESHOLD * similarity_max {
            continue;
        }
        if similarity_max < 0.3 {
            continue;
        }
        let (dxm, dym) = displacement_at(samples[ind_max].0);
        let distance = ((dxm * dxm + dym * dym) as f64).sqrt();
        if distance <= NEIGHBOUR_TOLERANCE {
            continue;
        }
        stop = ind;
        break;
    }

    if similarity_max <= 0.3 {
        return Ok(());
    }

    // Paint every near-maximum sample up to the stop point.
    for &(i, sim) in &samples[..=stop] {
        if sim < SIMILARITY_MATCHED_THRESHOLD * similarity_max {
            continue;
        }
        let (dx, dy) = displacement_at(i);
        for r in prop.min_row..prop.max_row {
            for c in prop.min_col..prop.max_col {
                if !in_template(r as i64, c as i64) {
                    continue;
                }
                let gr = r as i64 + dy;
                let gc = c as i64 + dx;
                if gr >= 0 && gc >= 0 && gr < rows && gc < cols {
                    matched.set(gr as usize, gc as usize, true);
                }
            }
        }
    }
    Ok(())
}
