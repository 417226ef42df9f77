//! Pipeline orchestrator: runs the detection stages in order and composes
//! the final label raster.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aux::{DemData, GswoData};
use crate::composites::{create_cdi, create_ndbi, create_ndsi, create_ndvi};
use crate::detectors::cloud::{
    detect_false_positive_pixels, detect_potential_cloud_pixels, detect_potential_clouds,
    erode_commissons,
};
use crate::detectors::shadow::{detect_potential_shadow, match_cloud_shadows, MatchingInputs};
use crate::detectors::{detect_absolute_snow, detect_snow, detect_water};
use crate::error::Result;
use crate::morphology::{dilate_square, enhance_line};
use crate::raster::{Mask, Raster};
use crate::scene::{Band, SceneRecord, Sensor};

/// Output label coding. Painting order is fixed (water, snow, shadow,
/// cloud, then nodata), so later classes win on overlap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LabelCodes {
    pub clear: u8,
    pub water: u8,
    pub cloud_shadow: u8,
    pub snow: u8,
    pub cloud: u8,
    pub nodata: u8,
}

impl Default for LabelCodes {
    fn default() -> Self {
        Self { clear: 0, water: 1, cloud_shadow: 2, snow: 3, cloud: 4, nodata: 255 }
    }
}

/// User-facing pipeline parameters. Defaults reproduce the published
/// Fmask 4 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmaskParams {
    /// Square dilation radii (pixels) applied before composition.
    pub cloud_dilation_px: usize,
    pub shadow_dilation_px: usize,
    pub snow_dilation_px: usize,
    /// Override of the sensor's cloud probability threshold τ.
    pub cloud_probability_threshold: Option<f64>,
    /// Percentile pair for every dynamic statistic, as fractions.
    pub low_percent: f64,
    pub high_percent: f64,
    /// Flood-fill difference needed for a potential shadow pixel.
    /// Deliberately conservative against reconstruction overdetection.
    pub shadow_probability_threshold: f32,
    /// Seed of the lapse-rate regression sampling; fixed for bit-stable runs.
    pub sampling_seed: u64,
    pub label_codes: LabelCodes,
}

impl Default for FmaskParams {
    fn default() -> Self {
        Self {
            cloud_dilation_px: 3,
            shadow_dilation_px: 3,
            snow_dilation_px: 0,
            cloud_probability_threshold: None,
            low_percent: 0.175,
            high_percent: 0.825,
            shadow_probability_threshold: 500.0,
            sampling_seed: 42,
            label_codes: LabelCodes::default(),
        }
    }
}

/// Full output of one pipeline run. The boolean masks are the dilated
/// versions that the label raster encodes.
#[derive(Debug, Clone)]
pub struct FmaskResult {
    pub results: Raster<u8>,
    pub cloud: Mask,
    pub cloud_shadow: Mask,
    pub snow: Mask,
    pub water: Mask,
    pub all_water: Mask,
    pub absolute_snow: Mask,
    /// Percent, clamped to [0, 100] at output time.
    pub over_land_probability: Raster<f32>,
    pub over_water_probability: Raster<f32>,
}

/// Run the detection cascade over an ingested scene.
///
/// Stage order:
///   1. spectral indices (and CDI for Sentinel-2)
///   2. snow and water
///   3. potential cloud pixels (cirrus band replaced by its normalisation)
///   4. absolute snow, NDBI line enhancement
///   5. potential clouds (BT replaced by its DEM normalisation)
///   6. commission candidates and erode/dilate cleanup
///   7. potential shadow and cloud-object matching
///   8. dilation and label composition
pub fn run(
    scene: &mut SceneRecord,
    dem: Option<&DemData>,
    gswo: Option<&GswoData>,
    params: &FmaskParams,
) -> Result<FmaskResult> {
    let rows = scene.rows;
    let cols = scene.cols;
    let sensor = scene.sensor;
    info!(scene = %scene.scene_id, ?sensor, rows, cols, "running detection pipeline");

    // ── 1. Spectral composites ──────────────────────────────────────────────
    let ndvi = create_ndvi(scene.require(Band::Red), scene.require(Band::Nir));
    let ndsi = create_ndsi(scene.require(Band::Green), scene.require(Band::Swir1));
    let ndbi = create_ndbi(scene.require(Band::Swir1), scene.require(Band::Nir));

    let cdi = match (sensor, scene.band(Band::Red3), scene.band(Band::Nir2)) {
        (Sensor::S2Msi, Some(red3), Some(nir2)) => {
            Some(create_cdi(scene.require(Band::Nir), nir2, red3))
        }
        _ => None,
    };

    // ── 2. Snow and water ───────────────────────────────────────────────────
    let snow = detect_snow(&ndsi, scene.require(Band::Nir), scene.require(Band::Green), scene.band(Band::Bt));
    let water_masks = detect_water(
        scene.require(Band::Nir),
        &ndvi,
        &scene.nodata_mask,
        Some(&snow),
        gswo.map(|g| &g.occurrence),
    );

    // ── 3. Potential cloud pixels ───────────────────────────────────────────
    let pcp = detect_potential_cloud_pixels(
        &ndsi,
        &ndvi,
        scene.require(Band::Blue),
        scene.require(Band::Green),
        scene.require(Band::Red),
        scene.require(Band::Nir),
        scene.require(Band::Swir1),
        scene.require(Band::Swir2),
        scene.band(Band::Cirrus),
        scene.band(Band::Bt),
        &scene.vis_saturation,
        &scene.nodata_mask,
        dem.map(|d| &d.elevation),
    )?;
    if let Some(normalized) = &pcp.normalized_cirrus {
        scene.replace_band(Band::Cirrus, normalized.clone());
    }

    // ── 4. Absolute snow and line-enhanced NDBI ─────────────────────────────
    let absolute_snow = detect_absolute_snow(
        sensor,
        &snow,
        scene.require(Band::Green),
        &scene.vis_saturation,
        &ndsi,
    );
    let ndbi = enhance_line(&ndbi);

    // ── 5. Potential clouds ─────────────────────────────────────────────────
    let threshold = params
        .cloud_probability_threshold
        .unwrap_or_else(|| sensor.cloud_threshold());
    let potential_clouds = detect_potential_clouds(
        scene.require(Band::Nir),
        scene.require(Band::Swir1),
        scene.band(Band::Cirrus),
        scene.band(Band::Bt),
        dem.map(|d| &d.elevation),
        &pcp,
        &scene.nodata_mask,
        &water_masks.water,
        sensor.probability_weight(),
        threshold,
        &ndsi,
        &ndvi,
        &ndbi,
        &scene.vis_saturation,
        params.low_percent,
        params.high_percent,
        params.sampling_seed,
    )?;
    if let Some(normalized) = &potential_clouds.bt_normalized_dem {
        scene.replace_band(Band::Bt, normalized.clone());
    }

    let mut cloud = potential_clouds.cloud.clone();
    cloud.clear_where(&absolute_snow);

    // ── 6. Commission removal ───────────────────────────────────────────────
    let false_positives = detect_false_positive_pixels(
        &ndbi,
        &ndvi,
        scene.band(Band::Bt),
        dem.map(|d| &d.slope),
        cdi.as_ref(),
        &snow,
        &water_masks.water,
        &cloud,
        &scene.nodata_mask,
        sensor.out_resolution(),
    )?;
    let cloud = erode_commissons(
        &cloud,
        &false_positives,
        &water_masks.water,
        cdi.as_ref(),
        sensor.erode_pixels(),
    );

    // ── 7. Cloud shadow ─────────────────────────────────────────────────────
    let valid_pixels = scene.nodata_mask.not();
    let cloud_shadow = if valid_pixels.count() == 0 {
        debug!("scene is entirely nodata, skipping shadow detection");
        Mask::zeros(rows, cols)
    } else {
        // Background statistics come from clear land, falling back to any
        // clear pixel, then to any valid pixel.
        let clear = pcp.potential_pixels.not().and(&valid_pixels);
        let backg_selection = if potential_clouds.clear_land.count() > 0 {
            potential_clouds.clear_land.clone()
        } else if clear.count() > 0 {
            clear
        } else {
            valid_pixels
        };
        let potential_shadow = detect_potential_shadow(
            scene.require(Band::Nir),
            scene.require(Band::Swir1),
            &backg_selection,
            &scene.nodata_mask,
            dem.map(|d| &d.slope),
            dem.map(|d| &d.aspect),
            scene.sun_elevation,
            scene.sun_azimuth,
            params.shadow_probability_threshold,
        )?;
        match_cloud_shadows(&MatchingInputs {
            cloud: &cloud,
            sum_clear_pixels: potential_clouds.sum_clear_pixels,
            all_water: &water_masks.all_water,
            potential_shadow: &potential_shadow,
            nodata_mask: &scene.nodata_mask,
            bt: scene.band(Band::Bt),
            dem: dem.map(|d| &d.elevation),
            sun_elevation: scene.sun_elevation,
            sun_azimuth: scene.sun_azimuth,
            out_resolution: sensor.out_resolution(),
            temp_test_low: potential_clouds.temp_test_low,
            temp_test_high: potential_clouds.temp_test_high,
            low_percent: params.low_percent,
            high_percent: params.high_percent,
        })?
    };

    // ── 8. Dilation and composition ─────────────────────────────────────────
    let snow = dilate_square(&snow, params.snow_dilation_px);
    let cloud_shadow = dilate_square(&cloud_shadow, params.shadow_dilation_px);
    let cloud = dilate_square(&cloud, params.cloud_dilation_px);

    let results = compose_labels(
        &water_masks.water,
        &snow,
        &cloud_shadow,
        &cloud,
        &scene.nodata_mask,
        &params.label_codes,
    );
    info!(
        cloud = cloud.count(),
        shadow = cloud_shadow.count(),
        snow = snow.count(),
        water = water_masks.water.count(),
        "pipeline finished"
    );

    Ok(FmaskResult {
        results,
        cloud,
        cloud_shadow,
        snow,
        water: water_masks.water,
        all_water: water_masks.all_water,
        absolute_snow,
        over_land_probability: potential_clouds.over_land_probability,
        over_water_probability: potential_clouds.over_water_probability,
    })
}

/// Paint the label raster in the fixed order water, snow, shadow, cloud,
/// then overwrite nodata.
pub fn compose_labels(
    water: &Mask,
    snow: &Mask,
    cloud_shadow: &Mask,
    cloud: &Mask,
    nodata_mask: &Mask,
    codes: &LabelCodes,
) -> Raster<u8> {
    let mut results = Raster::filled(water.rows, water.cols, codes.clear);
    let layers: [(&Mask, u8); 4] = [
        (water, codes.water),
        (snow, codes.snow),
        (cloud_shadow, codes.cloud_shadow),
        (cloud, codes.cloud),
    ];
    for (mask, value) in layers {
        for (out, &m) in results.data.iter_mut().zip(mask.data.iter()) {
            if m {
                *out = value;
            }
        }
    }
    for (out, &nd) in results.data.iter_mut().zip(nodata_mask.data.iter()) {
        if nd {
            *out = codes.nodata;
        }
    }
    results
}

/// Per-pixel cloud probability for the optional output product: the water
/// probability over water, the land probability elsewhere, clamped to
/// [0, 100], with nodata painted 255.
pub fn cloud_probability_raster(result: &FmaskResult, nodata_mask: &Mask) -> Raster<u8> {
    Raster::from_fn(result.results.rows, result.results.cols, |r, c| {
        if nodata_mask.get(r, c) {
            return 255;
        }
        let p = if result.water.get(r, c) {
            result.over_water_probability.get(r, c)
        } else {
            result.over_land_probability.get(r, c)
        };
        p.clamp(0.0, 100.0).round() as u8
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_order_resolves_overlap() {
        let n = 4;
        let all = Mask::filled(n, n, true);
        let none = Mask::zeros(n, n);
        let codes = LabelCodes::default();

        // cloud over water: cloud wins
        let results = compose_labels(&all, &none, &none, &all, &none, &codes);
        assert!(results.data.iter().all(|&v| v == codes.cloud));

        // shadow over snow: shadow wins; nodata beats everything
        let mut nodata = Mask::zeros(n, n);
        nodata.set(0, 0, true);
        let results = compose_labels(&none, &all, &all, &none, &nodata, &codes);
        assert_eq!(results.get(0, 0), codes.nodata);
        assert_eq!(results.get(1, 1), codes.cloud_shadow);
    }

    #[test]
    fn custom_codes_are_respected() {
        let n = 2;
        let all = Mask::filled(n, n, true);
        let none = Mask::zeros(n, n);
        let codes = LabelCodes { clear: 10, water: 11, cloud_shadow: 12, snow: 13, cloud: 14, nodata: 15 };
        let results = compose_labels(&all, &none, &none, &none, &none, &codes);
        assert!(results.data.iter().all(|&v| v == 11));
    }
}
