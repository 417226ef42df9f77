//! Potential clouds: per-pixel probability surfaces over land and water,
//! combined with dynamic per-scene thresholds (Zhu & Woodcock 2012, with the
//! Fmask 4 DEM normalisation of Qiu et al. 2017).

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::detectors::cloud::potential_pixels::PotentialCloudPixels;
use crate::error::Result;
use crate::raster::{Mask, Raster, NO_DATA};
use crate::stats;

/// Minimum clear pixels for the dynamic-threshold machinery; below this the
/// whole PCP layer is taken as cloud.
const CLEAR_PIXELS_THRESHOLD: usize = 40_000;

/// Target sample size of the stratified lapse-rate regression.
const TOTAL_SAMPLE: usize = 40_000;

/// Elevation stratum height (m) for regression sampling.
const STRATA_STEP: f64 = 300.0;

#[derive(Debug, Clone)]
pub struct PotentialClouds {
    pub sum_clear_pixels: usize,
    pub cloud: Mask,
    /// Baseline selection used for the land statistics (`idused`).
    pub clear_land: Mask,
    /// Low land-temperature test bound (hundredths of °C); 0 without BT.
    pub temp_test_low: f64,
    /// High land-temperature test bound; always ≥ `temp_test_low`.
    pub temp_test_high: f64,
    /// BT normalised against the DEM, when BT was present.
    pub bt_normalized_dem: Option<Raster<i16>>,
    /// Percent, clamped ≥ 0 (≤ 100 only at output time).
    pub over_land_probability: Raster<f32>,
    pub over_water_probability: Raster<f32>,
}

#[allow(clippy::too_many_arguments)]
pub fn detect_potential_clouds(
    nir: &Raster<i16>,
    swir1: &Raster<i16>,
    cirrus: Option<&Raster<i16>>,
    bt: Option<&Raster<i16>>,
    dem: Option<&Raster<i16>>,
    pcp: &PotentialCloudPixels,
    nodata_mask: &Mask,
    water: &Mask,
    thin_cirrus_weight: f64,
    cloud_probability_threshold: f64,
    ndsi: &Raster<f32>,
    ndvi: &Raster<f32>,
    ndbi: &Raster<f32>,
    vis_saturation: &Mask,
    low_percent: f64,
    high_percent: f64,
    sampling_seed: u64,
) -> Result<PotentialClouds> {
    let rows = nir.rows;
    let cols = nir.cols;

    let clear_pixels = pcp.potential_pixels.not().and(&nodata_mask.not());
    let sum_clear_pixels = clear_pixels.count();

    let clear_land_mask = clear_pixels.and(&water.not());
    let clear_water_mask = clear_pixels.and(water);

    // When nearly everything is a potential cloud pixel, screen all PCPs in
    // directly and report certain probabilities.
    if sum_clear_pixels <= CLEAR_PIXELS_THRESHOLD {
        debug!(sum_clear_pixels, "too few clear pixels, keeping every PCP");
        let mut cloud = clear_pixels;
        cloud.clear_where(nodata_mask);
        return Ok(PotentialClouds {
            sum_clear_pixels,
            cloud,
            clear_land: Mask::zeros(rows, cols),
            temp_test_low: 0.0,
            temp_test_high: 0.0,
            bt_normalized_dem: None,
            over_land_probability: Raster::filled(rows, cols, 100.0),
            over_water_probability: Raster::filled(rows, cols, 100.0),
        });
    }

    // Thin-cirrus probability.
    let probability_thin_cloud: Raster<f32> = match cirrus {
        Some(cirrus) => cirrus.map(|v| (v as f32 / 400.0).max(0.0)),
        None => Raster::filled(rows, cols, 0.0),
    };

    // Baseline selection: clear land when it covers at least 0.1 % of the
    // valid scene, otherwise any clear pixel.
    let valid_pixels = nodata_mask.not().count();
    let clear_land_share = 100.0 * clear_land_mask.count() as f64 / valid_pixels as f64;
    let idused = if clear_land_share >= 0.1 { clear_land_mask.clone() } else { clear_pixels.clone() };

    // Land probability: temperature when BT exists, HOT brightness otherwise.
    let mut temp_test_low = 0.0f64;
    let mut temp_test_high = 0.0f64;
    let mut bt_normalized_dem: Option<Raster<i16>> = None;
    let mut land_probability_temperature: Option<Raster<f32>> = None;
    let mut land_probability_brightness: Option<Raster<f32>> = None;

    if let Some(bt) = bt {
        let mut rng = StdRng::seed_from_u64(sampling_seed);
        let bt_norm = normalize_bt(bt, dem, &idused, low_percent, high_percent, &mut rng)?;
        let (prob, low, high) = land_temperature_probability(&bt_norm, &idused, low_percent, high_percent)?;
        temp_test_low = low;
        temp_test_high = high;
        debug!(temp_test_low, temp_test_high, "land temperature test bounds");
        land_probability_temperature = Some(prob);
        bt_normalized_dem = Some(bt_norm);
    } else {
        land_probability_brightness =
            Some(land_brightness_probability_hot(&pcp.hot, &idused, low_percent, high_percent)?);
    }

    let land_probability_variance =
        spectral_variance_probability(ndsi, ndvi, ndbi, vis_saturation, &pcp.whiteness);

    let mut over_land_probability = Raster::filled(rows, cols, 0.0f32);
    for i in 0..over_land_probability.data.len() {
        let temp = land_probability_temperature.as_ref().map_or(1.0, |p| p.data[i]);
        let bright = land_probability_brightness.as_ref().map_or(1.0, |p| p.data[i]);
        let var = land_probability_variance.data[i];
        over_land_probability.data[i] = 100.0
            * (temp * var * bright
                + thin_cirrus_weight as f32 * probability_thin_cloud.data[i]);
    }

    // Water probability: clear-water temperature (when enough clear water
    // exists) times SWIR1 brightness.
    let water_probability_temperature: Option<Raster<f32>> = match bt {
        Some(bt) if clear_water_mask.count() > 100 => {
            Some(water_temperature_probability(bt, &clear_water_mask, high_percent)?)
        }
        _ => None,
    };
    let mut over_water_probability = Raster::filled(rows, cols, 0.0f32);
    for i in 0..over_water_probability.data.len() {
        let temp = water_probability_temperature.as_ref().map_or(1.0, |p| p.data[i]);
        let bright = (swir1.data[i] as f32 / 1100.0).clamp(0.0, 1.0);
        over_water_probability.data[i] = 100.0
            * (temp * bright + thin_cirrus_weight as f32 * probability_thin_cloud.data[i]);
    }

    // Dynamic thresholds from the clear-pixel probability tails.
    let wclr_h = if clear_water_mask.count() > 0 {
        let mut values = stats::masked_values(&over_water_probability, &clear_water_mask);
        stats::percentile(&mut values, 100.0 * high_percent)?
    } else {
        0.0
    };
    let clr_h = if clear_land_mask.count() > 0 {
        let mut values = stats::masked_values(&over_land_probability, &clear_land_mask);
        stats::percentile(&mut values, 100.0 * high_percent)?
    } else {
        0.0
    };
    let dynamic_land_max = clr_h + cloud_probability_threshold;
    let dynamic_water_max = wclr_h + cloud_probability_threshold;
    debug!(dynamic_land_max, dynamic_water_max, "dynamic cloud thresholds");

    let mut cloud = Mask::zeros(rows, cols);
    for i in 0..cloud.data.len() {
        let over_land = over_land_probability.data[i] as f64 > dynamic_land_max && !water.data[i];
        let over_water = over_water_probability.data[i] as f64 > dynamic_water_max && water.data[i];
        cloud.data[i] = pcp.potential_pixels.data[i] && (over_land || over_water);
    }

    // Extremely cold clouds bypass the probability screen.
    if let Some(bt_norm) = &bt_normalized_dem {
        let cold_limit = temp_test_low - 3500.0;
        for (c, &t) in cloud.data.iter_mut().zip(bt_norm.data.iter()) {
            *c = *c || (t as f64) < cold_limit;
        }
    }
    cloud.clear_where(nodata_mask);
    debug!(pixels = cloud.count(), "potential clouds");

    // Negative products can appear where the variance term exceeds 1; the
    // published surfaces are non-negative.
    for v in over_land_probability.data.iter_mut() {
        *v = v.max(0.0);
    }
    for v in over_water_probability.data.iter_mut() {
        *v = v.max(0.0);
    }

    Ok(PotentialClouds {
        sum_clear_pixels,
        cloud,
        clear_land: idused,
        temp_test_low,
        temp_test_high,
        bt_normalized_dem,
        over_land_probability,
        over_water_probability,
    })
}

/// Normalise BT against the DEM with the Qiu et al. (2017) linear lapse
/// model: stratified sampling of clear observations by 300-m elevation bin,
/// OLS fit, and correction only when the lapse rate is negative with
/// p < 0.05. Returns BT unchanged whenever the data cannot support the fit.
pub fn normalize_bt(
    bt: &Raster<i16>,
    dem: Option<&Raster<i16>>,
    idused: &Mask,
    low_percent: f64,
    high_percent: f64,
    rng: &mut StdRng,
) -> Result<Raster<i16>> {
    let dem = match dem {
        Some(dem) => dem,
        None => return Ok(bt.clone()),
    };

    let dem_mask = dem.zip_map(bt, |d, t| d != NO_DATA && t != NO_DATA);
    if dem_mask.count() < 100 {
        return Ok(bt.clone());
    }

    let mut dem_values = stats::masked_values(dem, &dem_mask);
    let dem_b = stats::percentile(&mut dem_values, 0.0001)?;
    let dem_t = stats::percentile_sorted(&dem_values, 99.999);

    let mut temp_cl = stats::masked_values(bt, idused);
    let temp_min = stats::percentile(&mut temp_cl, low_percent * 100.0)?;
    let temp_max = stats::percentile_sorted(&temp_cl, high_percent * 100.0);

    // Clear observations inside the temperature band, with DEM coverage.
    let mut sample_dem: Vec<f64> = Vec::new();
    let mut sample_bt: Vec<f64> = Vec::new();
    for i in 0..bt.data.len() {
        let t = bt.data[i] as f64;
        if idused.data[i] && dem_mask.data[i] && t > temp_min && t < temp_max {
            sample_dem.push(dem.data[i] as f64);
            sample_bt.push(t);
        }
    }

    // Count non-empty 300-m strata, then draw an even sample from each.
    let n_strata = count_strata(&sample_dem, dem_b, dem_t);
    if n_strata == 0 {
        return Ok(bt.clone());
    }
    let per_stratum = (TOTAL_SAMPLE as f64 / n_strata as f64).round() as usize;
    if per_stratum < 1 {
        return Ok(bt.clone());
    }

    let mut dem_sampled: Vec<f64> = Vec::new();
    let mut bt_sampled: Vec<f64> = Vec::new();
    let mut k = dem_b;
    while k < dem_t + STRATA_STEP {
        let stratum: Vec<usize> = (0..sample_dem.len())
            .filter(|&i| sample_dem[i] >= k && sample_dem[i] < k + STRATA_STEP)
            .collect();
        if !stratum.is_empty() {
            let take = stratum.len().min(per_stratum);
            for idx in rand::seq::index::sample(rng, stratum.len(), take) {
                dem_sampled.push(sample_dem[stratum[idx]]);
                bt_sampled.push(sample_bt[stratum[idx]]);
            }
        }
        k += STRATA_STEP;
    }

    let fit = match stats::linear_fit(&dem_sampled, &bt_sampled) {
        Some(fit) => fit,
        None => return Ok(bt.clone()),
    };
    debug!(rate_lapse = fit.slope, p_value = fit.p_value, "lapse-rate regression");

    if fit.slope < 0.0 && fit.p_value < 0.05 {
        let rate_lapse = fit.slope;
        let corrected = Raster::from_fn(bt.rows, bt.cols, |r, c| {
            if dem_mask.get(r, c) {
                let v = bt.get(r, c) as f64 - rate_lapse * (dem.get(r, c) as f64 - dem_b);
                v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
            } else {
                bt.get(r, c)
            }
        });
        return Ok(corrected);
    }
    Ok(bt.clone())
}

fn count_strata(dem_values: &[f64], dem_b: f64, dem_t: f64) -> usize {
    let mut n = 0usize;
    let mut k = dem_b;
    while k < dem_t + STRATA_STEP {
        if dem_values.iter().any(|&v| v >= k && v < k + STRATA_STEP) {
            n += 1;
        }
        k += STRATA_STEP;
    }
    n
}

/// Land temperature probability: the clear-land BT percentile band, widened
/// by ±4 °C, mapped linearly so cold pixels score high. Clamped ≥ 0; values
/// above 1 are kept (very cold pixels).
fn land_temperature_probability(
    bt_normalized: &Raster<i16>,
    idused: &Mask,
    low_percent: f64,
    high_percent: f64,
) -> Result<(Raster<f32>, f64, f64)> {
    const TEMP_BUFFER: f64 = 4.0 * 100.0;

    let mut values = stats::masked_values(bt_normalized, idused);
    let low = stats::percentile(&mut values, 100.0 * low_percent)?;
    let high = stats::percentile_sorted(&values, 100.0 * high_percent);

    let temp_test_low = low - TEMP_BUFFER;
    let temp_test_high = high + TEMP_BUFFER;
    let temp_limit = temp_test_high - temp_test_low;

    let probability = bt_normalized
        .map(|t| (((temp_test_high - t as f64) / temp_limit).max(0.0)) as f32);
    Ok((probability, temp_test_low, temp_test_high))
}

/// HOT brightness probability for scenes without a thermal band,
/// clamped to [0, 1].
fn land_brightness_probability_hot(
    hot: &Raster<f32>,
    idused: &Mask,
    low_percent: f64,
    high_percent: f64,
) -> Result<Raster<f32>> {
    let mut values = stats::masked_values(hot, idused);
    let low = stats::percentile(&mut values, 100.0 * low_percent)? - 400.0;
    let high = stats::percentile_sorted(&values, 100.0 * high_percent) + 400.0;
    let span = high - low;
    Ok(hot.map(|h| (((h as f64 - low) / span).clamp(0.0, 1.0)) as f32))
}

/// Temperature probability over water: distance below the clear-water BT
/// tail, in 4 °C units, clamped ≥ 0.
fn water_temperature_probability(
    bt: &Raster<i16>,
    clear_water_mask: &Mask,
    high_percent: f64,
) -> Result<Raster<f32>> {
    let mut values = stats::masked_values(bt, clear_water_mask);
    let tail = stats::percentile(&mut values, 100.0 * high_percent)?;
    Ok(bt.map(|t| (((tail - t as f64) / 400.0).max(0.0)) as f32))
}

/// Spectral variance probability: 1 minus the strongest of the index
/// magnitudes and whiteness. Saturated pixels zero the NDSI/NDVI terms on
/// the side the saturation biases.
fn spectral_variance_probability(
    ndsi: &Raster<f32>,
    ndvi: &Raster<f32>,
    ndbi: &Raster<f32>,
    vis_saturation: &Mask,
    whiteness: &Raster<f32>,
) -> Raster<f32> {
    Raster::from_fn(ndsi.rows, ndsi.cols, |r, c| {
        let sat = vis_saturation.get(r, c);
        let mut s = ndsi.get(r, c);
        let mut v = ndvi.get(r, c);
        if sat && s < 0.0 {
            s = 0.0;
        }
        if sat && v > 0.0 {
            v = 0.0;
        }
        let spread = s.abs().max(v.abs()).max(ndbi.get(r, c).abs()).max(whiteness.get(r, c));
        1.0 - spread
    })
}
